//! Analysis orchestration
//!
//! [`AnalysisEngine`] is the pure per-entity analysis. [`AnalysisPass`]
//! fetches every metric from a [`MetricSource`](crate::source::MetricSource)
//! and fans the entities out to the engine. [`AnalysisScheduler`] repeats
//! passes on an interval and keeps the latest reports in a [`ResultCache`].

mod cache;
mod engine;
mod pass;
mod scheduler;

pub use cache::{CacheKey, ResultCache, DEFAULT_CACHE_TTL};
pub use engine::{AnalysisEngine, EngineConfig};
pub use pass::{AnalysisPass, PassConfig, PassOutcome};
pub use scheduler::{AnalysisScheduler, PassResult, SchedulerConfig, DEFAULT_ANALYSIS_INTERVAL};

use crate::error::{EngineError, EngineResult};
use crate::models::parse_duration_label;
use crate::scoring::{parse_horizon, DEFAULT_HORIZON_HOURS};
use chrono::Duration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_STEP: &str = "15m";

/// What one analysis pass covers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRequest {
    /// Length of history to fetch, in days
    pub window_days: u32,
    /// Query resolution such as `"15m"`
    pub step: String,
    /// Restrict the pass to these entities
    pub entities: Option<Vec<String>>,
    /// Forecast horizon such as `"24h"`
    pub horizon: String,
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            step: DEFAULT_STEP.to_string(),
            entities: None,
            horizon: format!("{}h", DEFAULT_HORIZON_HOURS),
        }
    }
}

impl AnalysisRequest {
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn with_horizon(mut self, horizon: impl Into<String>) -> Self {
        self.horizon = horizon.into();
        self
    }

    /// Check the request and return its step and horizon in hours
    pub fn validate(&self) -> EngineResult<(Duration, u32)> {
        if self.window_days == 0 {
            return Err(EngineError::configuration("window_days must be positive"));
        }
        let window = Duration::try_days(self.window_days as i64).ok_or_else(|| {
            EngineError::configuration(format!("window of {} days is too long", self.window_days))
        })?;
        let step = parse_duration_label(&self.step)?;
        if step >= window {
            return Err(EngineError::configuration(format!(
                "step {} does not fit in a {} day window",
                self.step, self.window_days
            )));
        }
        if matches!(&self.entities, Some(e) if e.is_empty()) {
            return Err(EngineError::configuration("entity filter is empty"));
        }
        let horizon = parse_horizon(&self.horizon)?;
        Ok((step, horizon))
    }

    pub fn cache_key(&self, entity_id: &str) -> CacheKey {
        CacheKey::new(entity_id, self.window_days, &self.step)
    }
}
