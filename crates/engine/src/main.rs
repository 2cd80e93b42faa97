//! FIP health engine - periodic health analytics for financial information providers
//!
//! This binary queries a Prometheus-compatible store on a fixed interval,
//! analyses every provider and serves the latest results over HTTP.

use anyhow::{Context, Result};
use engine_lib::{
    health::{components, HealthRegistry},
    insights::{InsightGenerator, RemoteInsightGenerator, RuleBasedInsights},
    models::MetricName,
    observability::{EngineMetrics, StructuredLogger},
    pipeline::{AnalysisEngine, AnalysisPass, AnalysisScheduler, PassConfig},
    source::PrometheusSource,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fip-health-engine");

    let config = config::ServiceConfig::load()?;
    info!(
        instance = %config.instance_name,
        source_url = %config.source.base_url,
        "Engine configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::ANALYZER).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = EngineMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(
        ENGINE_VERSION,
        &config.source.base_url,
        config.scheduler.interval_secs,
    );

    let engine =
        AnalysisEngine::new(config.engine.clone()).context("Invalid engine configuration")?;
    let source =
        PrometheusSource::new(&config.source).context("Failed to create metric source")?;
    let insights: Arc<dyn InsightGenerator> = match &config.insights {
        Some(remote) => {
            info!(endpoint = %remote.endpoint, "Using remote insight service");
            Arc::new(RemoteInsightGenerator::new(remote)?)
        }
        None => Arc::new(RuleBasedInsights::new()),
    };

    let pass = AnalysisPass::new(Arc::new(source), Arc::new(engine), logger.clone())
        .with_config(PassConfig {
            metrics: MetricName::ALL.to_vec(),
            query_timeout: config.source.timeout(),
        })
        .with_insights(insights);

    let (scheduler, mut results) =
        AnalysisScheduler::new(Arc::new(pass), config.scheduler.clone(), health_registry.clone());
    let scheduler = Arc::new(scheduler);

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        scheduler.cache(),
    ));

    health_registry.set_ready(true).await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown_tx.subscribe()));

    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            match &result.skipped_reason {
                Some(reason) => debug!(reason = %reason, "Analysis pass skipped"),
                None => debug!(
                    entities = result.entities,
                    alerts = result.alerts,
                    failed = result.failed_entities.len(),
                    duration_us = result.duration_us,
                    "Analysis pass published"
                ),
            }
        }
    });

    // Start health, metrics and results server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    scheduler_handle.await.context("Scheduler task failed")?;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
