//! Periodic analysis loop
//!
//! Runs a full pass every interval, caches the reports and keeps component
//! health up to date. A tick that lands while the previous pass is still
//! running is skipped.

use super::{AnalysisPass, AnalysisRequest, PassOutcome, ResultCache, DEFAULT_CACHE_TTL};
use crate::health::{components, HealthRegistry};
use crate::models::MetricName;
use crate::observability::EngineMetrics;
use crate::report::{EntityReport, FleetSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default time between passes
pub const DEFAULT_ANALYSIS_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub cache_ttl_secs: u64,
    /// Window, step, entity filter and horizon of every pass
    pub request: AnalysisRequest,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_ANALYSIS_INTERVAL.as_secs(),
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            request: AnalysisRequest::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Result of one scheduled pass
#[derive(Debug, Clone)]
pub struct PassResult {
    pub started_at: DateTime<Utc>,
    pub entities: usize,
    pub alerts: usize,
    pub unavailable_metrics: Vec<MetricName>,
    pub failed_entities: Vec<String>,
    pub skipped_reason: Option<String>,
    pub duration_us: u64,
}

impl PassResult {
    fn skipped(started_at: DateTime<Utc>, reason: impl Into<String>, duration_us: u64) -> Self {
        Self {
            started_at,
            entities: 0,
            alerts: 0,
            unavailable_metrics: Vec::new(),
            failed_entities: Vec::new(),
            skipped_reason: Some(reason.into()),
            duration_us,
        }
    }
}

/// Clears the running flag when a pass ends, even on panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AnalysisScheduler {
    pass: Arc<AnalysisPass>,
    config: SchedulerConfig,
    cache: Arc<ResultCache>,
    health: HealthRegistry,
    metrics: EngineMetrics,
    running: AtomicBool,
    result_tx: mpsc::Sender<PassResult>,
}

impl AnalysisScheduler {
    pub fn new(
        pass: Arc<AnalysisPass>,
        config: SchedulerConfig,
        health: HealthRegistry,
    ) -> (Self, mpsc::Receiver<PassResult>) {
        let (tx, rx) = mpsc::channel(100);
        let scheduler = Self {
            pass,
            cache: Arc::new(ResultCache::new(config.cache_ttl())),
            config,
            health,
            metrics: EngineMetrics::new(),
            running: AtomicBool::new(false),
            result_tx: tx,
        };
        (scheduler, rx)
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        self.cache.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the analysis loop until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval().as_secs(),
            window_days = self.config.request.window_days,
            step = %self.config.request.step,
            "Starting analysis scheduler"
        );
        self.health.register(components::SCHEDULER).await;

        let mut ticker = interval(self.config.interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.run_once().await;
                    });
                }
                _ = shutdown.recv() => {
                    info!("Shutting down analysis scheduler");
                    break;
                }
            }
        }
    }

    /// Run one pass now, unless one is already in flight
    pub async fn run_once(&self) -> PassResult {
        let started_at = Utc::now();
        let start = Instant::now();

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.inc_skipped_passes();
            debug!("Previous analysis pass still running, skipping tick");
            let result = PassResult::skipped(
                started_at,
                "Previous pass still running",
                start.elapsed().as_micros() as u64,
            );
            let _ = self.result_tx.send(result.clone()).await;
            return result;
        }
        let _guard = RunningGuard(&self.running);

        let result = match self.pass.run(&self.config.request).await {
            Ok(outcome) => self.complete(started_at, outcome).await,
            Err(e) => {
                warn!(error = %e, "Analysis pass rejected");
                self.health
                    .set_unhealthy(components::ANALYZER, e.to_string())
                    .await;
                PassResult::skipped(started_at, e.to_string(), start.elapsed().as_micros() as u64)
            }
        };

        let _ = self.result_tx.send(result.clone()).await;
        result
    }

    async fn complete(&self, started_at: DateTime<Utc>, outcome: PassOutcome) -> PassResult {
        self.update_health(&outcome).await;

        for report in &outcome.reports {
            self.cache
                .insert(self.config.request.cache_key(&report.entity_id), report.clone());
        }
        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!(purged = purged, "Expired cached reports");
        }

        let alerts = outcome.alert_count();
        let duration_ms = outcome.duration_us / 1000;
        self.metrics
            .observe_pass_duration(outcome.duration_us as f64 / 1_000_000.0);
        self.metrics.set_last_pass_timestamp(Utc::now().timestamp());
        self.pass.logger().log_pass_completed(
            outcome.reports.len(),
            alerts,
            &outcome.unavailable_metrics,
            duration_ms,
        );

        PassResult {
            started_at,
            entities: outcome.reports.len(),
            alerts,
            unavailable_metrics: outcome.unavailable_metrics,
            failed_entities: outcome.failed_entities,
            skipped_reason: None,
            duration_us: outcome.duration_us,
        }
    }

    async fn update_health(&self, outcome: &PassOutcome) {
        let unavailable = outcome.unavailable_metrics.len();
        if unavailable == 0 {
            self.health.set_healthy(components::SOURCE).await;
        } else if outcome.reports.is_empty() {
            self.health
                .set_unhealthy(components::SOURCE, "No metric data available")
                .await;
        } else {
            let names: Vec<&str> = outcome
                .unavailable_metrics
                .iter()
                .map(|m| m.as_str())
                .collect();
            self.health
                .set_degraded(
                    components::SOURCE,
                    format!("Unavailable metrics: {}", names.join(", ")),
                )
                .await;
        }

        if outcome.failed_entities.is_empty() {
            self.health.set_healthy(components::ANALYZER).await;
        } else {
            self.health
                .set_degraded(
                    components::ANALYZER,
                    format!("{} entities failed analysis", outcome.failed_entities.len()),
                )
                .await;
        }
        self.health.set_healthy(components::SCHEDULER).await;
    }

    /// Latest cached report per entity
    pub fn latest_reports(&self) -> Vec<EntityReport> {
        self.cache.latest()
    }

    /// Fleet summary over the cached reports
    pub fn summary(&self) -> FleetSummary {
        FleetSummary::from_reports(&self.cache.latest(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::MetricPoint;
    use crate::observability::StructuredLogger;
    use crate::pipeline::{AnalysisEngine, EngineConfig};
    use crate::source::{async_trait, MetricSource, QueryRange, SourceError};

    /// Consent points for one entity, optionally slow
    struct StubSource {
        delay: Duration,
    }

    #[async_trait]
    impl MetricSource for StubSource {
        async fn query_range(
            &self,
            metric: MetricName,
            range: &QueryRange,
        ) -> Result<Vec<MetricPoint>, SourceError> {
            tokio::time::sleep(self.delay).await;
            if metric != MetricName::ConsentSuccessRate {
                return Err(SourceError::Query("not exported".into()));
            }
            Ok((0..24)
                .map(|i| MetricPoint {
                    timestamp: range.end - chrono::Duration::hours(i),
                    entity_id: "axis".to_string(),
                    metric,
                    value: Some(97.0),
                })
                .collect())
        }
    }

    fn scheduler(delay: Duration) -> (Arc<AnalysisScheduler>, mpsc::Receiver<PassResult>, HealthRegistry) {
        let engine = Arc::new(AnalysisEngine::new(EngineConfig::default()).unwrap());
        let pass = AnalysisPass::new(
            Arc::new(StubSource { delay }),
            engine,
            StructuredLogger::new("test"),
        );
        let health = HealthRegistry::new();
        let (scheduler, rx) =
            AnalysisScheduler::new(Arc::new(pass), SchedulerConfig::default(), health.clone());
        (Arc::new(scheduler), rx, health)
    }

    #[tokio::test]
    async fn test_run_once_caches_reports() {
        let (scheduler, mut rx, health) = scheduler(Duration::ZERO);

        let result = scheduler.run_once().await;
        assert!(result.skipped_reason.is_none());
        assert_eq!(result.entities, 1);
        assert!(result.unavailable_metrics.contains(&MetricName::Status));

        let reports = scheduler.latest_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].entity_id, "axis");
        assert_eq!(scheduler.summary().entities_analyzed, 1);

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.entities, 1);

        let source = health.component(components::SOURCE).await.unwrap();
        assert_eq!(source.status, ComponentStatus::Degraded);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_overlapping_pass_skipped() {
        let (scheduler, _rx, _health) = scheduler(Duration::from_millis(100));

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_once().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(scheduler.is_running());

        let second = scheduler.run_once().await;
        assert_eq!(
            second.skipped_reason.as_deref(),
            Some("Previous pass still running")
        );

        let first = first.await.unwrap();
        assert!(first.skipped_reason.is_none());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (scheduler, _rx, _health) = scheduler(Duration::ZERO);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(scheduler.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
