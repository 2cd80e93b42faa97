//! Pure per-entity analysis

use crate::alerts::{AlertConfig, AlertGenerator, AlertInput};
use crate::error::{EngineError, EngineResult};
use crate::features::{FeatureCalculator, FeatureConfig};
use crate::insights::RuleBasedInsights;
use crate::maintenance::{DetectorConfig, DowntimeAnalysis, MaintenanceDetector};
use crate::models::EntitySeries;
use crate::report::EntityReport;
use crate::scoring::{ForecastConfig, HealthScorer, RiskForecaster, RiskTrends, ScoringConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Configuration of every analysis component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub detector: DetectorConfig,
    pub scoring: ScoringConfig,
    pub forecast: ForecastConfig,
    pub alerts: AlertConfig,
    /// Known user base per entity, used for impact estimates
    pub user_bases: BTreeMap<String, u64>,
    /// User base assumed for entities missing from `user_bases`
    pub default_user_base: Option<u64>,
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.features.validate()?;
        self.detector.validate()?;
        self.scoring.validate()?;
        self.forecast.validate()?;
        self.alerts.validate()
    }

    pub fn user_base(&self, entity_id: &str) -> Option<u64> {
        self.user_bases
            .get(entity_id)
            .copied()
            .or(self.default_user_base)
    }
}

/// Runs features, downtime detection, scoring, forecasting, alerting and
/// rule-based insight for one entity at a time
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    features: FeatureCalculator,
    detector: MaintenanceDetector,
    scorer: HealthScorer,
    forecaster: RiskForecaster,
    alerts: AlertGenerator,
    insights: RuleBasedInsights,
    config: EngineConfig,
}

impl AnalysisEngine {
    /// Validate all configuration and build the components
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            features: FeatureCalculator::new(config.features.clone())?,
            detector: MaintenanceDetector::new(config.detector.clone())?,
            scorer: HealthScorer::new(config.scoring.clone())?,
            forecaster: RiskForecaster::new(config.forecast.clone())?,
            alerts: AlertGenerator::new(config.alerts.clone())?,
            insights: RuleBasedInsights::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Analyse one entity's series as of `now`
    pub fn analyze_entity(
        &self,
        series: &EntitySeries,
        now: DateTime<Utc>,
        horizon_hours: u32,
    ) -> EntityReport {
        let entity_id = series.entity_id.as_str();
        let features = self.features.calculate(series);
        let timeline = self.scorer.score_timeline(series);

        let downtime = match self.detector.analyze(series, Some(&timeline)) {
            Ok(analysis) => analysis,
            Err(EngineError::DataUnavailable(reason)) => {
                debug!(entity_id = %entity_id, reason = %reason, "Skipping downtime analysis");
                DowntimeAnalysis::default()
            }
            Err(e) => {
                debug!(entity_id = %entity_id, error = %e, "Downtime analysis failed");
                DowntimeAnalysis::default()
            }
        };

        let snapshot = series.snapshot(self.config.user_base(entity_id));
        let health = snapshot.as_ref().and_then(|s| match self.scorer.score(s) {
            Ok(score) => Some(score),
            Err(e) => {
                debug!(entity_id = %entity_id, error = %e, "No health score");
                None
            }
        });

        let trends = RiskTrends::from_timeline(&timeline, health.as_ref().map(|h| h.score));
        let forecast = self.forecaster.forecast(
            entity_id,
            now,
            horizon_hours,
            trends,
            &downtime.recurrence,
        );

        let alerts = match &snapshot {
            Some(snapshot) => {
                let input = AlertInput::new(snapshot, series, now)
                    .with_features(&features)
                    .with_forecast(&forecast);
                self.alerts.generate(&input)
            }
            None => Vec::new(),
        };

        let mut report = EntityReport {
            entity_id: entity_id.to_string(),
            generated_at: now,
            features,
            downtime,
            health,
            forecast: Some(forecast),
            alerts,
            insight: None,
            unavailable_metrics: Vec::new(),
        };
        report.insight = Some(self.insights.insight(&report));

        debug!(
            entity_id = %entity_id,
            health = ?report.health_score(),
            events = report.downtime.events.len(),
            alerts = report.alerts.len(),
            "Entity analysed"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricName, MetricSeries};
    use crate::scoring::RiskLevel;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
    }

    fn flat(metric: MetricName, value: f64, days: i64) -> MetricSeries {
        let step = Duration::hours(1);
        let n = (days * 24) as usize;
        let start = now() - step * (n as i32 - 1);
        MetricSeries::from_values("sbi", metric, start, step, &vec![value; n])
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut config = EngineConfig::default();
        config.alerts.max_actions = 0;
        assert!(matches!(
            AnalysisEngine::new(config),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_user_base_lookup() {
        let config = EngineConfig {
            user_bases: BTreeMap::from([("sbi".to_string(), 4500)]),
            default_user_base: Some(1000),
            ..EngineConfig::default()
        };
        assert_eq!(config.user_base("sbi"), Some(4500));
        assert_eq!(config.user_base("boi"), Some(1000));
    }

    #[test]
    fn test_healthy_week_has_no_risk() {
        let engine = AnalysisEngine::new(EngineConfig::default()).unwrap();
        let series = EntitySeries::new("sbi")
            .with_series(flat(MetricName::ConsentSuccessRate, 97.0, 7))
            .with_series(flat(MetricName::DataFetchSuccessRate, 96.0, 7))
            .with_series(flat(MetricName::ResponseTime, 1.1, 7))
            .with_series(flat(MetricName::ErrorRate, 0.5, 7))
            .with_series(flat(MetricName::Status, 1.0, 7));

        let report = engine.analyze_entity(&series, now(), 24);
        let health = report.health.as_ref().unwrap();
        assert_eq!(health.score, 100.0);
        assert_eq!(health.risk_level, RiskLevel::Low);
        assert!(report.downtime.events.is_empty());
        let forecast = report.forecast.as_ref().unwrap();
        assert_eq!(forecast.horizon_hours, 24);
        assert!(forecast.windows.is_empty());
        assert!(report.alerts.is_empty());
        assert!(report.insight.is_some());
    }

    #[test]
    fn test_empty_series_yields_empty_sections() {
        let engine = AnalysisEngine::new(EngineConfig::default()).unwrap();
        let report = engine.analyze_entity(&EntitySeries::new("sbi"), now(), 6);
        assert!(report.health.is_none());
        assert!(report.alerts.is_empty());
        assert!(report.features.statistical.is_empty());
        assert_eq!(report.forecast.as_ref().unwrap().horizon_hours, 6);
    }
}
