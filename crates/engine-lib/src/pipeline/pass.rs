//! One full analysis pass over the fleet

use super::{AnalysisEngine, AnalysisRequest};
use crate::error::EngineResult;
use crate::insights::{InsightGenerator, InsightSource, RuleBasedInsights};
use crate::models::{EntitySeries, MetricName, MetricPoint};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::report::EntityReport;
use crate::source::{MetricSource, QueryRange, SourceError};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Maximum time for a single range query before the metric is marked unavailable
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PassConfig {
    /// Metrics fetched on every pass
    pub metrics: Vec<MetricName>,
    pub query_timeout: Duration,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            metrics: MetricName::ALL.to_vec(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Reports produced by one pass
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub generated_at: DateTime<Utc>,
    pub reports: Vec<EntityReport>,
    /// Metrics whose query failed, timed out or came back empty
    pub unavailable_metrics: Vec<MetricName>,
    /// Entities whose analysis aborted and were reported empty
    pub failed_entities: Vec<String>,
    pub duration_us: u64,
}

impl PassOutcome {
    pub fn alert_count(&self) -> usize {
        self.reports.iter().map(|r| r.alerts.len()).sum()
    }
}

/// Fetches every configured metric and analyses each entity found
pub struct AnalysisPass {
    source: Arc<dyn MetricSource>,
    engine: Arc<AnalysisEngine>,
    insights: Arc<dyn InsightGenerator>,
    config: PassConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl AnalysisPass {
    pub fn new(
        source: Arc<dyn MetricSource>,
        engine: Arc<AnalysisEngine>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            source,
            engine,
            insights: Arc::new(RuleBasedInsights::new()),
            config: PassConfig::default(),
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    pub fn with_config(mut self, config: PassConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_insights(mut self, insights: Arc<dyn InsightGenerator>) -> Self {
        self.insights = insights;
        self
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Run a pass ending now
    pub async fn run(&self, request: &AnalysisRequest) -> EngineResult<PassOutcome> {
        self.run_at(request, Utc::now()).await
    }

    /// Run a pass whose window ends at `now`
    pub async fn run_at(
        &self,
        request: &AnalysisRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<PassOutcome> {
        let started = Instant::now();
        let (_, horizon_hours) = request.validate()?;

        let mut range = QueryRange::last_days(now, request.window_days, request.step.clone())?;
        if let Some(entities) = &request.entities {
            range = range.with_entities(entities.clone());
        }

        let (points, unavailable) = self.fetch_all(&range).await;

        let mut entities = EntitySeries::group_points(points);
        if let Some(filter) = &request.entities {
            entities.retain(|e| filter.contains(&e.entity_id));
        }

        let mut handles = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity_id = entity.entity_id.clone();
            let present: BTreeSet<MetricName> = entity.metrics().collect();
            let engine = self.engine.clone();
            let handle = tokio::task::spawn_blocking(move || {
                engine.analyze_entity(&entity, now, horizon_hours)
            });
            handles.push((entity_id, present, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut failed_entities = Vec::new();
        for (entity_id, present, handle) in handles {
            let mut report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    self.metrics.inc_entity_failures();
                    self.logger.log_entity_failure(&entity_id, &e.to_string());
                    failed_entities.push(entity_id.clone());
                    EntityReport::empty(entity_id, now)
                }
            };

            report.unavailable_metrics = self
                .config
                .metrics
                .iter()
                .copied()
                .filter(|m| unavailable.contains(m) || !present.contains(m))
                .collect();

            if report.health.is_some() && self.insights.source() != InsightSource::RuleBased {
                report.insight = Some(self.insights.generate(&report).await);
            }

            self.record(&report);
            reports.push(report);
        }

        Ok(PassOutcome {
            generated_at: now,
            reports,
            unavailable_metrics: unavailable,
            failed_entities,
            duration_us: started.elapsed().as_micros() as u64,
        })
    }

    /// Query every configured metric; failures only mark the metric unavailable
    async fn fetch_all(&self, range: &QueryRange) -> (Vec<MetricPoint>, Vec<MetricName>) {
        let mut points = Vec::new();
        let mut unavailable = Vec::new();

        for &metric in &self.config.metrics {
            let started = Instant::now();
            let result = match tokio::time::timeout(
                self.config.query_timeout,
                self.source.query_range(metric, range),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(self.config.query_timeout)),
            };
            self.metrics
                .observe_query_duration(metric, started.elapsed().as_secs_f64());

            match result {
                Ok(fetched) if fetched.is_empty() => {
                    debug!(metric = %metric, "Metric returned no series");
                    unavailable.push(metric);
                }
                Ok(fetched) => {
                    debug!(metric = %metric, points = fetched.len(), "Metric fetched");
                    points.extend(fetched);
                }
                Err(e) => {
                    self.metrics.inc_source_errors(metric);
                    self.logger.log_source_failure(metric, &e.to_string());
                    unavailable.push(metric);
                }
            }
        }

        (points, unavailable)
    }

    fn record(&self, report: &EntityReport) {
        self.metrics.inc_entities_analyzed();
        if let Some(score) = report.health_score() {
            self.metrics.set_health_score(&report.entity_id, score);
        }
        for alert in &report.alerts {
            self.metrics.inc_alerts(alert.severity);
            self.logger.log_alert(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{async_trait, Insight};
    use crate::pipeline::EngineConfig;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;

    /// Serves fixed points per metric; metrics without points fail
    struct FakeSource {
        points: HashMap<MetricName, Vec<MetricPoint>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl MetricSource for FakeSource {
        async fn query_range(
            &self,
            metric: MetricName,
            _range: &QueryRange,
        ) -> Result<Vec<MetricPoint>, SourceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.points
                .get(&metric)
                .cloned()
                .ok_or_else(|| SourceError::Query(format!("{} unavailable", metric)))
        }
    }

    struct FixedInsights;

    #[async_trait]
    impl InsightGenerator for FixedInsights {
        fn source(&self) -> InsightSource {
            InsightSource::Remote
        }

        async fn generate(&self, report: &EntityReport) -> Insight {
            let mut insight = RuleBasedInsights::new().insight(report);
            insight.source = InsightSource::Remote;
            insight.reasoning = "remote".to_string();
            insight
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
    }

    fn points(entity: &str, metric: MetricName, value: f64, hours: i64) -> Vec<MetricPoint> {
        (0..hours)
            .map(|i| MetricPoint {
                timestamp: now() - ChronoDuration::hours(hours - 1 - i),
                entity_id: entity.to_string(),
                metric,
                value: Some(value),
            })
            .collect()
    }

    fn source(delay: Option<Duration>) -> FakeSource {
        let mut map = HashMap::new();
        let mut consent = points("hdfc", MetricName::ConsentSuccessRate, 96.0, 48);
        consent.extend(points("sbi", MetricName::ConsentSuccessRate, 92.0, 48));
        map.insert(MetricName::ConsentSuccessRate, consent);
        map.insert(
            MetricName::DataFetchSuccessRate,
            points("hdfc", MetricName::DataFetchSuccessRate, 94.0, 48),
        );
        map.insert(MetricName::Status, points("hdfc", MetricName::Status, 1.0, 48));
        FakeSource { points: map, delay }
    }

    fn pass(source: FakeSource) -> AnalysisPass {
        let engine = Arc::new(AnalysisEngine::new(EngineConfig::default()).unwrap());
        AnalysisPass::new(Arc::new(source), engine, StructuredLogger::new("test"))
    }

    #[tokio::test]
    async fn test_failed_metrics_do_not_abort_pass() {
        let outcome = pass(source(None))
            .run_at(&AnalysisRequest::default(), now())
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 2);
        assert!(outcome.failed_entities.is_empty());
        assert!(outcome.unavailable_metrics.contains(&MetricName::ResponseTime));
        assert!(outcome.unavailable_metrics.contains(&MetricName::ErrorRate));
        assert!(!outcome
            .unavailable_metrics
            .contains(&MetricName::ConsentSuccessRate));

        let hdfc = &outcome.reports[0];
        assert_eq!(hdfc.entity_id, "hdfc");
        assert!(hdfc.health.is_some());
        assert!(hdfc.unavailable_metrics.contains(&MetricName::ResponseTime));
        assert!(!hdfc.unavailable_metrics.contains(&MetricName::Status));

        // sbi only reported consent
        let sbi = &outcome.reports[1];
        assert!(sbi.unavailable_metrics.contains(&MetricName::Status));
        assert!(sbi.unavailable_metrics.contains(&MetricName::DataFetchSuccessRate));
    }

    #[tokio::test]
    async fn test_entity_filter_applied() {
        let request = AnalysisRequest::default().with_entities(vec!["sbi".to_string()]);
        let outcome = pass(source(None)).run_at(&request, now()).await.unwrap();
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].entity_id, "sbi");
    }

    #[tokio::test]
    async fn test_slow_queries_time_out() {
        let config = PassConfig {
            metrics: vec![MetricName::ConsentSuccessRate],
            query_timeout: Duration::from_millis(10),
        };
        let outcome = pass(source(Some(Duration::from_millis(200))))
            .with_config(config)
            .run_at(&AnalysisRequest::default(), now())
            .await
            .unwrap();

        assert!(outcome.reports.is_empty());
        assert_eq!(outcome.unavailable_metrics, vec![MetricName::ConsentSuccessRate]);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let request = AnalysisRequest {
            step: "soon".to_string(),
            ..AnalysisRequest::default()
        };
        tokio_test::assert_err!(pass(source(None)).run_at(&request, now()).await);
    }

    #[tokio::test]
    async fn test_remote_insights_replace_rule_based() {
        let outcome = pass(source(None))
            .with_insights(Arc::new(FixedInsights))
            .run_at(&AnalysisRequest::default(), now())
            .await
            .unwrap();

        let insight = outcome.reports[0].insight.as_ref().unwrap();
        assert_eq!(insight.source, InsightSource::Remote);
        assert_eq!(insight.reasoning, "remote");
    }
}
