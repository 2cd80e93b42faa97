//! Service configuration
//!
//! Defaults come from the library's config structs. An optional
//! `config/fip-health.{toml,yaml,json}` file and `FIP_HEALTH__*` environment
//! variables are layered on top, e.g. `FIP_HEALTH__SCHEDULER__INTERVAL_SECS=300`.

use anyhow::{Context, Result};
use engine_lib::insights::RemoteInsightConfig;
use engine_lib::pipeline::{EngineConfig, SchedulerConfig};
use engine_lib::source::SourceConfig;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "config/fip-health";
pub const ENV_PREFIX: &str = "FIP_HEALTH";

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Name attached to every structured log event
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health, metrics and results
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// External insight service; rule-based insights when absent
    #[serde(default)]
    pub insights: Option<RemoteInsightConfig>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "fip-health-engine".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl ServiceConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        let service: ServiceConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        service.validate()?;
        Ok(service)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .context("Invalid engine configuration")?;
        self.scheduler
            .request
            .validate()
            .context("Invalid analysis request")?;
        Ok(())
    }
}
