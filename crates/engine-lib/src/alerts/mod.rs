//! Proactive alerting
//!
//! Alerts combine the current snapshot with the last few hours of history
//! (and, when available, the entity's features and risk forecast). The
//! generator runs every check, then [`deduplicate`] and [`prioritize`] shape
//! the final list.

mod generator;

pub use generator::{AlertGenerator, AlertInput};

use crate::error::{EngineError, EngineResult};
use crate::models::{BusinessHours, MetricName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Length of the short-term analysis window
pub const DEFAULT_SHORT_WINDOW_MINUTES: i64 = 180;

/// Upper bound on recommended actions per alert
pub const MAX_RECOMMENDED_ACTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Critical => write!(f, "critical"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ThresholdViolation,
    AcceleratingDecline,
    MetricDivergence,
    StabilityIssue,
    StatusChange,
    Anomaly,
    PredictedRisk,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ThresholdViolation => "threshold_violation",
            AlertType::AcceleratingDecline => "accelerating_decline",
            AlertType::MetricDivergence => "metric_divergence",
            AlertType::StabilityIssue => "stability_issue",
            AlertType::StatusChange => "status_change",
            AlertType::Anomaly => "anomaly",
            AlertType::PredictedRisk => "predicted_risk",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numbers behind an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMetrics {
    pub current_rate: f64,
    pub historical_avg: f64,
    pub deviation: f64,
    pub threshold: f64,
}

/// Business context attached to every alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    pub affected_users: u64,
    pub business_impact: String,
    /// Summary of the short-term window
    pub historical_pattern: String,
    pub peak_hour: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub entity_id: String,
    pub severity: AlertSeverity,
    pub alert_type: AlertType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricName>,
    pub message: String,
    pub metrics: AlertMetrics,
    pub context: AlertContext,
    pub recommended_actions: Vec<String>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Critical and warning bounds for a threshold-checked metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub critical: f64,
    pub warning: f64,
    /// Expected value when no short-term history exists
    pub baseline: f64,
    #[serde(default)]
    pub inverted: bool,
}

impl AlertThreshold {
    pub const fn new(critical: f64, warning: f64, baseline: f64) -> Self {
        Self {
            critical,
            warning,
            baseline,
            inverted: false,
        }
    }

    pub const fn inverted(critical: f64, warning: f64, baseline: f64) -> Self {
        Self {
            critical,
            warning,
            baseline,
            inverted: true,
        }
    }

    pub fn breaches_critical(&self, value: f64) -> bool {
        if self.inverted {
            value > self.critical
        } else {
            value < self.critical
        }
    }

    pub fn breaches_warning(&self, value: f64) -> bool {
        if self.inverted {
            value > self.warning
        } else {
            value < self.warning
        }
    }
}

/// Configuration for alert generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub thresholds: BTreeMap<MetricName, AlertThreshold>,
    pub short_window_minutes: i64,
    /// Short-window trend below which a decline is rapid
    pub rapid_decline: f64,
    pub gradual_decline: f64,
    pub improvement: f64,
    /// Rolling windows for the accelerating-decline check, shortest first
    pub acceleration_windows_minutes: Vec<i64>,
    /// Percentage points between consent and data fetch rates
    pub divergence_points: f64,
    /// Coefficient of variation, in percent
    pub stability_cv_pct: f64,
    /// Short-window standard deviation considered highly variable
    pub variability_std: f64,
    pub anomaly_burst: usize,
    pub status_critical: f64,
    pub status_degraded: f64,
    /// Share of the user base above which business impact is severe
    pub severe_impact_fraction: f64,
    pub max_actions: usize,
    pub business_hours: BusinessHours,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            thresholds: BTreeMap::from([
                (MetricName::ConsentSuccessRate, AlertThreshold::new(70.0, 85.0, 95.0)),
                (MetricName::DataFetchSuccessRate, AlertThreshold::new(65.0, 80.0, 90.0)),
                (MetricName::ResponseTime, AlertThreshold::inverted(5.0, 3.0, 2.0)),
            ]),
            short_window_minutes: DEFAULT_SHORT_WINDOW_MINUTES,
            rapid_decline: -10.0,
            gradual_decline: -5.0,
            improvement: 5.0,
            acceleration_windows_minutes: vec![30, 60, 180],
            divergence_points: 20.0,
            stability_cv_pct: 15.0,
            variability_std: 10.0,
            anomaly_burst: 3,
            status_critical: 0.1,
            status_degraded: 0.5,
            severe_impact_fraction: 0.3,
            max_actions: MAX_RECOMMENDED_ACTIONS,
            business_hours: BusinessHours::default(),
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> EngineResult<()> {
        for (metric, t) in &self.thresholds {
            let ordered = if t.inverted {
                t.critical > t.warning
            } else {
                t.critical < t.warning
            };
            if !ordered || !t.critical.is_finite() || !t.warning.is_finite() {
                return Err(EngineError::configuration(format!(
                    "malformed alert thresholds for {}: critical {} / warning {}",
                    metric, t.critical, t.warning
                )));
            }
        }
        if self.short_window_minutes <= 0 {
            return Err(EngineError::configuration(
                "short_window_minutes must be positive",
            ));
        }
        let windows = &self.acceleration_windows_minutes;
        if windows.len() != 3
            || windows.iter().any(|w| *w <= 0)
            || windows.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(EngineError::configuration(
                "acceleration_windows_minutes must be three increasing positive values",
            ));
        }
        if self.status_critical > self.status_degraded {
            return Err(EngineError::configuration(
                "status_critical must not exceed status_degraded",
            ));
        }
        if self.max_actions == 0 {
            return Err(EngineError::configuration("max_actions must be positive"));
        }
        self.business_hours.validate()
    }
}

/// Drop alerts sharing (entity, type, severity) with an earlier one
pub fn deduplicate(alerts: Vec<Alert>) -> Vec<Alert> {
    let mut seen = HashSet::new();
    alerts
        .into_iter()
        .filter(|a| seen.insert((a.entity_id.clone(), a.alert_type, a.severity)))
        .collect()
}

/// Order by severity (critical first), then by descending confidence
pub fn prioritize(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        a.severity.cmp(&b.severity).then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}
