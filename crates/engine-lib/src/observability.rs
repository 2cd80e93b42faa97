//! Self-metrics and structured event logging for the analytics engine
//!
//! Provides:
//! - Prometheus metrics (pass latency, source query latency, alert counts, per-entity health)
//! - Structured JSON-friendly log events with tracing

use crate::alerts::{Alert, AlertSeverity};
use crate::models::MetricName;
use prometheus::{
    register_gauge_vec, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, GaugeVec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for whole-pass latency (in seconds)
const PASS_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Buckets for single range queries (in seconds)
const QUERY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    pass_duration_seconds: Histogram,
    source_query_duration_seconds: HistogramVec,
    entities_analyzed: IntCounter,
    alerts_generated: IntCounterVec,
    source_errors: IntCounterVec,
    entity_failures: IntCounter,
    skipped_passes: IntCounter,
    entity_health_score: GaugeVec,
    last_pass_timestamp: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            pass_duration_seconds: register_histogram!(
                "fip_health_engine_pass_duration_seconds",
                "Time spent on one full analysis pass",
                PASS_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_duration_seconds"),

            source_query_duration_seconds: register_histogram_vec!(
                "fip_health_engine_source_query_duration_seconds",
                "Time spent on range queries against the metric source",
                &["metric"],
                QUERY_BUCKETS.to_vec()
            )
            .expect("Failed to register source_query_duration_seconds"),

            entities_analyzed: register_int_counter!(
                "fip_health_engine_entities_analyzed_total",
                "Total number of entity analyses completed"
            )
            .expect("Failed to register entities_analyzed"),

            alerts_generated: register_int_counter_vec!(
                "fip_health_engine_alerts_generated_total",
                "Total number of alerts generated",
                &["severity"]
            )
            .expect("Failed to register alerts_generated"),

            source_errors: register_int_counter_vec!(
                "fip_health_engine_source_errors_total",
                "Total number of failed or timed out range queries",
                &["metric"]
            )
            .expect("Failed to register source_errors"),

            entity_failures: register_int_counter!(
                "fip_health_engine_entity_failures_total",
                "Total number of entity analyses that aborted"
            )
            .expect("Failed to register entity_failures"),

            skipped_passes: register_int_counter!(
                "fip_health_engine_skipped_passes_total",
                "Scheduler ticks skipped because a pass was still running"
            )
            .expect("Failed to register skipped_passes"),

            entity_health_score: register_gauge_vec!(
                "fip_health_engine_entity_health_score",
                "Latest composite health score per entity",
                &["entity"]
            )
            .expect("Failed to register entity_health_score"),

            last_pass_timestamp: register_int_gauge!(
                "fip_health_engine_last_pass_timestamp_seconds",
                "Unix time at which the last analysis pass finished"
            )
            .expect("Failed to register last_pass_timestamp"),
        }
    }
}

/// Handle to the engine's Prometheus metrics
///
/// Every handle shares the same global instance.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_pass_duration(&self, duration_secs: f64) {
        self.inner().pass_duration_seconds.observe(duration_secs);
    }

    pub fn observe_query_duration(&self, metric: MetricName, duration_secs: f64) {
        self.inner()
            .source_query_duration_seconds
            .with_label_values(&[metric.as_str()])
            .observe(duration_secs);
    }

    pub fn inc_entities_analyzed(&self) {
        self.inner().entities_analyzed.inc();
    }

    pub fn inc_alerts(&self, severity: AlertSeverity) {
        self.inner()
            .alerts_generated
            .with_label_values(&[&severity.to_string()])
            .inc();
    }

    pub fn inc_source_errors(&self, metric: MetricName) {
        self.inner()
            .source_errors
            .with_label_values(&[metric.as_str()])
            .inc();
    }

    pub fn inc_entity_failures(&self) {
        self.inner().entity_failures.inc();
    }

    pub fn inc_skipped_passes(&self) {
        self.inner().skipped_passes.inc();
    }

    pub fn set_health_score(&self, entity_id: &str, score: f64) {
        self.inner()
            .entity_health_score
            .with_label_values(&[entity_id])
            .set(score);
    }

    pub fn set_last_pass_timestamp(&self, unix_secs: i64) {
        self.inner().last_pass_timestamp.set(unix_secs);
    }
}

/// Emits engine lifecycle and analysis events with consistent fields
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, source_url: &str, interval_secs: u64) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            engine_version = %version,
            source_url = %source_url,
            interval_secs = interval_secs,
            "Health analytics engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Health analytics engine shutting down"
        );
    }

    pub fn log_pass_completed(
        &self,
        entities: usize,
        alerts: usize,
        unavailable_metrics: &[MetricName],
        duration_ms: u64,
    ) {
        if unavailable_metrics.is_empty() {
            info!(
                event = "pass_completed",
                instance = %self.instance,
                entities = entities,
                alerts = alerts,
                duration_ms = duration_ms,
                "Analysis pass completed"
            );
        } else {
            let unavailable: Vec<&str> = unavailable_metrics.iter().map(|m| m.as_str()).collect();
            warn!(
                event = "pass_completed",
                instance = %self.instance,
                entities = entities,
                alerts = alerts,
                unavailable = ?unavailable,
                duration_ms = duration_ms,
                "Analysis pass completed with unavailable metrics"
            );
        }
    }

    pub fn log_alert(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Critical => {
                warn!(
                    event = "alert_raised",
                    instance = %self.instance,
                    entity_id = %alert.entity_id,
                    alert_id = %alert.alert_id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    confidence = alert.confidence,
                    message = %alert.message,
                    "Critical alert raised"
                );
            }
            _ => {
                info!(
                    event = "alert_raised",
                    instance = %self.instance,
                    entity_id = %alert.entity_id,
                    alert_id = %alert.alert_id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    confidence = alert.confidence,
                    message = %alert.message,
                    "Alert raised"
                );
            }
        }
    }

    pub fn log_source_failure(&self, metric: MetricName, error: &str) {
        warn!(
            event = "source_query_failed",
            instance = %self.instance,
            metric = %metric,
            error = %error,
            "Metric unavailable for this pass"
        );
    }

    pub fn log_entity_failure(&self, entity_id: &str, error: &str) {
        warn!(
            event = "entity_analysis_failed",
            instance = %self.instance,
            entity_id = %entity_id,
            error = %error,
            "Entity analysis aborted, reporting empty result"
        );
    }
}
