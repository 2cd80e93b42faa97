//! Composite health scoring and short-horizon risk forecasting

mod forecast;
mod health;

pub use forecast::{
    parse_horizon, ForecastConfig, MaintenanceRecommendation, RiskForecast, RiskForecaster,
    RiskTrends, RiskWindow, DEFAULT_HORIZON_HOURS, TREND_SAMPLES,
};
pub use health::HealthScorer;

use crate::error::{EngineError, EngineResult};
use crate::models::MetricName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Risk tier derived from a 0-100 health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// `[0,30)` critical, `[30,60)` high, `[60,85)` medium, `[85,100]` low
    pub fn from_score(score: f64) -> Self {
        if score < 30.0 {
            RiskLevel::Critical
        } else if score < 60.0 {
            RiskLevel::High
        } else if score < 85.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Scoring band for one metric
///
/// For regular metrics a value at or above `warning` scores 1 and at or
/// below `critical` scores 0. Inverted metrics (latency, error rate) mirror
/// that.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub critical: f64,
    pub warning: f64,
    pub weight: f64,
    #[serde(default)]
    pub inverted: bool,
}

impl MetricThreshold {
    pub const fn new(critical: f64, warning: f64, weight: f64) -> Self {
        Self {
            critical,
            warning,
            weight,
            inverted: false,
        }
    }

    pub const fn inverted(critical: f64, warning: f64, weight: f64) -> Self {
        Self {
            critical,
            warning,
            weight,
            inverted: true,
        }
    }

    /// Score in `[0, 1]` by linear interpolation between the bounds
    pub fn score(&self, value: f64) -> f64 {
        if self.inverted {
            if value <= self.warning {
                1.0
            } else if value <= self.critical {
                1.0 - (value - self.warning) / (self.critical - self.warning)
            } else {
                0.0
            }
        } else if value >= self.warning {
            1.0
        } else if value >= self.critical {
            (value - self.critical) / (self.warning - self.critical)
        } else {
            0.0
        }
    }

    /// True if the value is on the bad side of the critical bound
    pub fn breaches_critical(&self, value: f64) -> bool {
        if self.inverted {
            value > self.critical
        } else {
            value < self.critical
        }
    }

    /// True if the value is on the bad side of the warning bound
    pub fn breaches_warning(&self, value: f64) -> bool {
        if self.inverted {
            value > self.warning
        } else {
            value < self.warning
        }
    }

    fn validate(&self, metric: MetricName) -> EngineResult<()> {
        let ordered = if self.inverted {
            self.critical > self.warning
        } else {
            self.critical < self.warning
        };
        if !ordered || !self.critical.is_finite() || !self.warning.is_finite() {
            return Err(EngineError::configuration(format!(
                "malformed thresholds for {}: critical {} / warning {}",
                metric, self.critical, self.warning
            )));
        }
        if !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(EngineError::configuration(format!(
                "weight for {} must be non-negative",
                metric
            )));
        }
        Ok(())
    }
}

/// Weights and thresholds for composite health scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub metrics: BTreeMap<MetricName, MetricThreshold>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            metrics: BTreeMap::from([
                (MetricName::ConsentSuccessRate, MetricThreshold::new(70.0, 85.0, 0.25)),
                (MetricName::DataFetchSuccessRate, MetricThreshold::new(75.0, 90.0, 0.25)),
                (MetricName::ResponseTime, MetricThreshold::inverted(5.0, 3.0, 0.20)),
                (MetricName::ErrorRate, MetricThreshold::inverted(10.0, 5.0, 0.15)),
                (MetricName::Status, MetricThreshold::new(0.5, 0.8, 0.15)),
            ]),
        }
    }
}

impl ScoringConfig {
    pub fn threshold(&self, metric: MetricName) -> Option<&MetricThreshold> {
        self.metrics.get(&metric)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.metrics.is_empty() {
            return Err(EngineError::configuration("no scoring metrics configured"));
        }
        for (metric, threshold) in &self.metrics {
            threshold.validate(*metric)?;
        }
        let total: f64 = self.metrics.values().map(|t| t.weight).sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(EngineError::configuration(format!(
                "scoring weights must sum to 1.0, got {:.4}",
                total
            )));
        }
        Ok(())
    }
}

/// Composite health at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub risk_level: RiskLevel,
    /// Metrics scoring below 0.5
    pub risk_factors: Vec<MetricName>,
    pub component_scores: BTreeMap<MetricName, f64>,
}

/// One entry of a scored health timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPoint {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub risk_factors: Vec<MetricName>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_boundaries() {
        assert_eq!(RiskLevel::from_score(29.99), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(60.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(85.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::Low);
    }

    #[test]
    fn test_threshold_interpolation() {
        let consent = MetricThreshold::new(70.0, 85.0, 0.25);
        assert_eq!(consent.score(85.0), 1.0);
        assert_eq!(consent.score(70.0), 0.0);
        assert_eq!(consent.score(77.5), 0.5);
        assert_eq!(consent.score(20.0), 0.0);

        let latency = MetricThreshold::inverted(5.0, 3.0, 0.2);
        assert_eq!(latency.score(3.0), 1.0);
        assert_eq!(latency.score(5.0), 0.0);
        assert_eq!(latency.score(4.0), 0.5);
        assert_eq!(latency.score(9.0), 0.0);
        assert!(latency.breaches_critical(5.5));
        assert!(!latency.breaches_critical(4.5));
        assert!(latency.breaches_warning(4.5));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScoringConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = ScoringConfig::default();
        if let Some(t) = config.metrics.get_mut(&MetricName::Status) {
            t.weight = 0.5;
        }
        assert!(matches!(config.validate(), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = ScoringConfig::default();
        config
            .metrics
            .insert(MetricName::ConsentSuccessRate, MetricThreshold::new(90.0, 80.0, 0.25));
        assert!(config.validate().is_err());
    }
}
