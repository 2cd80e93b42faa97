//! Feature extraction for provider health analysis
//!
//! Turns one provider's raw metric series into a [`FeatureSet`] of
//! statistical, trend, pattern, anomaly, performance and stability
//! descriptors. Absent metrics produce absent sub-sections; undefined
//! statistics resolve to 0.

mod calculator;
pub mod stats;

pub use calculator::FeatureCalculator;
pub use stats::linear_regression_slope;

use crate::error::{EngineError, EngineResult};
use crate::models::MetricName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default |z| above which a point counts as anomalous
pub const DEFAULT_Z_THRESHOLD: f64 = 2.5;

/// Anomaly features need more than this many observations
pub const MIN_ANOMALY_SAMPLES: usize = 6;

/// Configuration for feature extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub z_threshold: f64,
    pub iqr_multiplier: f64,
    /// Start of the "recent" anomaly window as a fraction of the series
    pub recent_window_start: f64,
    pub min_anomaly_samples: usize,
    /// Success-rate percentages used for time-below profiles
    pub success_warning_pct: f64,
    pub success_critical_pct: f64,
    /// Response times in seconds used for time-above profiles
    pub response_slow_secs: f64,
    pub response_critical_secs: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            z_threshold: DEFAULT_Z_THRESHOLD,
            iqr_multiplier: 1.5,
            recent_window_start: 0.8,
            min_anomaly_samples: MIN_ANOMALY_SAMPLES,
            success_warning_pct: 80.0,
            success_critical_pct: 50.0,
            response_slow_secs: 5.0,
            response_critical_secs: 10.0,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.z_threshold.is_finite()
            || self.z_threshold <= 0.0
            || !self.iqr_multiplier.is_finite()
            || self.iqr_multiplier <= 0.0
        {
            return Err(EngineError::configuration(
                "z_threshold and iqr_multiplier must be positive",
            ));
        }
        if !(0.0..1.0).contains(&self.recent_window_start) {
            return Err(EngineError::configuration(
                "recent_window_start must be within [0, 1)",
            ));
        }
        if self.success_critical_pct >= self.success_warning_pct {
            return Err(EngineError::configuration(
                "success_critical_pct must be below success_warning_pct",
            ));
        }
        if self.response_slow_secs >= self.response_critical_secs {
            return Err(EngineError::configuration(
                "response_slow_secs must be below response_critical_secs",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub total_points: usize,
    pub missing_values: usize,
    pub missing_percentage: f64,
    pub data_span_hours: f64,
    pub avg_interval_minutes: f64,
}

impl DataQuality {
    pub fn completeness_pct(&self) -> f64 {
        100.0 - self.missing_percentage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalFeatures {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub p25: f64,
    pub p75: f64,
    pub p95: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub coefficient_of_variation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn from_slope(slope: f64) -> Self {
        if slope > 0.0 {
            TrendDirection::Increasing
        } else if slope < 0.0 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendFeatures {
    pub slope: f64,
    pub direction: TrendDirection,
    pub recent_vs_historical_change_pct: f64,
    pub trend_strength: f64,
    /// Short moving average above the long one at the last point
    pub moving_avg_crossover: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFeatures {
    pub peak_hour: u32,
    pub low_hour: u32,
    pub hourly_variation_coefficient: f64,
    pub weekend_vs_weekday_ratio: f64,
    pub has_clear_daily_pattern: bool,
    pub most_stable_hour: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

impl AnomalySeverity {
    pub fn from_rate(rate: f64) -> Self {
        if rate > 0.1 {
            AnomalySeverity::High
        } else if rate > 0.05 {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFeatures {
    pub total_anomalies: usize,
    pub anomaly_rate: f64,
    pub iqr_anomalies: usize,
    pub recent_anomalies: usize,
    pub max_z_score: f64,
    pub severity: AnomalySeverity,
}

/// Time-below profile of a success-rate metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRateProfile {
    pub time_below_warning: f64,
    pub time_below_critical: f64,
    pub average: f64,
    pub worst: f64,
    pub volatility: f64,
}

/// Time-above profile of the response-time metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeProfile {
    pub time_above_slow: f64,
    pub time_above_critical: f64,
    pub average: f64,
    pub worst: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_response_correlation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_stability: Option<SuccessRateProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_analysis: Option<ResponseTimeProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusStability {
    pub status_changes: usize,
    pub healthy_time_pct: f64,
    pub degraded_time_pct: f64,
    pub critical_time_pct: f64,
    pub stability_score: f64,
    pub status_volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl StabilityGrade {
    pub fn from_cv(cv: f64) -> Self {
        if cv < 0.1 {
            StabilityGrade::Excellent
        } else if cv < 0.2 {
            StabilityGrade::Good
        } else if cv < 0.3 {
            StabilityGrade::Fair
        } else {
            StabilityGrade::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallStability {
    pub average_coefficient_of_variation: f64,
    pub grade: StabilityGrade,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusStability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall: Option<OverallStability>,
}

/// Engineered features for one entity over one analysis window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub entity_id: String,
    pub data_quality: BTreeMap<MetricName, DataQuality>,
    pub statistical: BTreeMap<MetricName, StatisticalFeatures>,
    pub trend: BTreeMap<MetricName, TrendFeatures>,
    pub pattern: BTreeMap<MetricName, PatternFeatures>,
    pub anomaly: BTreeMap<MetricName, AnomalyFeatures>,
    pub performance: PerformanceFeatures,
    pub stability: StabilityFeatures,
}

impl FeatureSet {
    pub fn empty(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            data_quality: BTreeMap::new(),
            statistical: BTreeMap::new(),
            trend: BTreeMap::new(),
            pattern: BTreeMap::new(),
            anomaly: BTreeMap::new(),
            performance: PerformanceFeatures::default(),
            stability: StabilityFeatures::default(),
        }
    }

    /// Mean completeness across every metric seen, if any
    pub fn data_completeness_pct(&self) -> Option<f64> {
        if self.data_quality.is_empty() {
            return None;
        }
        let total: f64 = self
            .data_quality
            .values()
            .map(DataQuality::completeness_pct)
            .sum();
        Some(total / self.data_quality.len() as f64)
    }
}
