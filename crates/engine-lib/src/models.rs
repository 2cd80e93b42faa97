//! Core data models for provider health analysis

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metrics exported for every provider endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    ConsentSuccessRate,
    DataFetchSuccessRate,
    ResponseTime,
    ErrorRate,
    Status,
    TotalRequests,
}

impl MetricName {
    pub const ALL: [MetricName; 6] = [
        MetricName::ConsentSuccessRate,
        MetricName::DataFetchSuccessRate,
        MetricName::ResponseTime,
        MetricName::ErrorRate,
        MetricName::Status,
        MetricName::TotalRequests,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ConsentSuccessRate => "consent_success_rate",
            MetricName::DataFetchSuccessRate => "data_fetch_success_rate",
            MetricName::ResponseTime => "response_time",
            MetricName::ErrorRate => "error_rate",
            MetricName::Status => "status",
            MetricName::TotalRequests => "total_requests",
        }
    }

    /// Name of the exported Prometheus series
    pub fn selector(&self) -> &'static str {
        match self {
            MetricName::ConsentSuccessRate => "fip_consent_success_rate",
            MetricName::DataFetchSuccessRate => "fip_data_fetch_success_rate",
            MetricName::ResponseTime => "fip_avg_response_time_seconds",
            MetricName::ErrorRate => "fip_error_rate",
            MetricName::Status => "fip_status",
            MetricName::TotalRequests => "fip_total_requests_total",
        }
    }

    /// Range-query expression, optionally narrowed by a label matcher
    /// such as `fip_name=~"hdfc|icici"`.
    pub fn query(&self, matcher: Option<&str>) -> String {
        let selector = match matcher {
            Some(m) => format!("{}{{{}}}", self.selector(), m),
            None => self.selector().to_string(),
        };
        match self {
            MetricName::TotalRequests => format!("increase({}[1h])", selector),
            _ => selector,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| EngineError::configuration(format!("unknown metric '{}'", s)))
    }
}

/// One raw observation as returned by a metric source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub metric: MetricName,
    /// `None` marks a missing value
    pub value: Option<f64>,
}

/// A timestamped value inside a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: Option<f64>) -> Self {
        Self {
            timestamp,
            value: value.filter(|v| v.is_finite()),
        }
    }
}

/// One metric for one entity, ordered by time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    pub entity_id: String,
    pub metric: MetricName,
    samples: Vec<Sample>,
}

impl MetricSeries {
    pub fn new(entity_id: impl Into<String>, metric: MetricName, samples: Vec<Sample>) -> Self {
        let mut samples: Vec<Sample> = samples
            .into_iter()
            .map(|s| Sample::new(s.timestamp, s.value))
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Self {
            entity_id: entity_id.into(),
            metric,
            samples,
        }
    }

    /// Build a regularly spaced series; non-finite values become missing
    pub fn from_values(
        entity_id: impl Into<String>,
        metric: MetricName,
        start: DateTime<Utc>,
        step: Duration,
        values: &[f64],
    ) -> Self {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(start + step * i as i32, Some(*v)))
            .collect();
        Self::new(entity_id, metric, samples)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.samples.iter().filter(|s| s.value.is_none()).count()
    }

    /// Non-missing values in time order
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().filter_map(|s| s.value).collect()
    }

    /// Non-missing (timestamp, value) pairs in time order
    pub fn observations(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.samples
            .iter()
            .filter_map(|s| s.value.map(|v| (s.timestamp, v)))
    }

    /// Most recent non-missing observation
    pub fn latest(&self) -> Option<(DateTime<Utc>, f64)> {
        self.samples
            .iter()
            .rev()
            .find_map(|s| s.value.map(|v| (s.timestamp, v)))
    }

    /// Samples with `start <= timestamp <= end`
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> MetricSeries {
        MetricSeries {
            entity_id: self.entity_id.clone(),
            metric: self.metric,
            samples: self
                .samples
                .iter()
                .filter(|s| s.timestamp >= start && s.timestamp <= end)
                .copied()
                .collect(),
        }
    }

    /// Median spacing between consecutive samples
    pub fn inferred_step(&self) -> Option<Duration> {
        let mut deltas: Vec<Duration> = self
            .samples
            .windows(2)
            .map(|w| w[1].timestamp - w[0].timestamp)
            .filter(|d| *d > Duration::zero())
            .collect();
        if deltas.is_empty() {
            return None;
        }
        deltas.sort();
        Some(deltas[deltas.len() / 2])
    }
}

/// All series for one entity over the analysis window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySeries {
    pub entity_id: String,
    series: BTreeMap<MetricName, MetricSeries>,
}

impl EntitySeries {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            series: BTreeMap::new(),
        }
    }

    pub fn with_series(mut self, series: MetricSeries) -> Self {
        self.insert(series);
        self
    }

    pub fn insert(&mut self, series: MetricSeries) {
        self.series.insert(series.metric, series);
    }

    pub fn get(&self, metric: MetricName) -> Option<&MetricSeries> {
        self.series.get(&metric)
    }

    pub fn series(&self) -> impl Iterator<Item = &MetricSeries> {
        self.series.values()
    }

    pub fn metrics(&self) -> impl Iterator<Item = MetricName> + '_ {
        self.series.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|s| s.is_empty())
    }

    /// Sorted union of every sample timestamp
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        let mut ts: Vec<DateTime<Utc>> = self
            .series
            .values()
            .flat_map(|s| s.samples().iter().map(|x| x.timestamp))
            .collect();
        ts.sort();
        ts.dedup();
        ts
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.series
            .values()
            .filter_map(|s| s.samples().last().map(|x| x.timestamp))
            .max()
    }

    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> EntitySeries {
        EntitySeries {
            entity_id: self.entity_id.clone(),
            series: self
                .series
                .iter()
                .map(|(k, s)| (*k, s.slice(start, end)))
                .collect(),
        }
    }

    /// Latest non-missing value of every metric, or `None` if nothing was observed
    pub fn snapshot(&self, user_base: Option<u64>) -> Option<MetricSnapshot> {
        let mut values = BTreeMap::new();
        let mut timestamp: Option<DateTime<Utc>> = None;
        for (metric, series) in &self.series {
            if let Some((ts, v)) = series.latest() {
                values.insert(*metric, v);
                timestamp = Some(timestamp.map_or(ts, |t| t.max(ts)));
            }
        }
        timestamp.map(|timestamp| MetricSnapshot {
            entity_id: self.entity_id.clone(),
            timestamp,
            values,
            user_base,
        })
    }

    /// Group flat source points into per-entity series
    pub fn group_points(points: Vec<MetricPoint>) -> Vec<EntitySeries> {
        let mut grouped: BTreeMap<String, BTreeMap<MetricName, Vec<Sample>>> = BTreeMap::new();
        for p in points {
            grouped
                .entry(p.entity_id)
                .or_default()
                .entry(p.metric)
                .or_default()
                .push(Sample::new(p.timestamp, p.value));
        }
        grouped
            .into_iter()
            .map(|(entity_id, metrics)| {
                let mut entity = EntitySeries::new(entity_id.clone());
                for (metric, samples) in metrics {
                    entity.insert(MetricSeries::new(entity_id.clone(), metric, samples));
                }
                entity
            })
            .collect()
    }
}

/// Current values for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<MetricName, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_base: Option<u64>,
}

impl MetricSnapshot {
    pub fn new(entity_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            values: BTreeMap::new(),
            user_base: None,
        }
    }

    pub fn with_value(mut self, metric: MetricName, value: f64) -> Self {
        if value.is_finite() {
            self.values.insert(metric, value);
        }
        self
    }

    pub fn with_user_base(mut self, user_base: u64) -> Self {
        self.user_base = Some(user_base);
        self
    }

    pub fn get(&self, metric: MetricName) -> Option<f64> {
        self.values.get(&metric).copied()
    }
}

/// Weekday business-hours window, `start_hour` inclusive, `end_hour` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
        }
    }
}

impl BusinessHours {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        !is_weekend(ts) && self.contains_hour(ts.hour())
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        (self.start_hour..self.end_hour).contains(&hour)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(EngineError::configuration(format!(
                "invalid business hours {}..{}",
                self.start_hour, self.end_hour
            )));
        }
        Ok(())
    }
}

pub fn is_weekend(ts: &DateTime<Utc>) -> bool {
    matches!(ts.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Parse labels such as `"30s"`, `"15m"`, `"24h"` or `"7d"`
pub fn parse_duration_label(label: &str) -> EngineResult<Duration> {
    let label = label.trim();
    let invalid = || EngineError::configuration(format!("invalid duration '{}'", label));
    let split = label
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = label.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }
    let duration = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => None,
    };
    duration.ok_or_else(invalid)
}

/// Replace NaN and infinities so every emitted float serializes as a number
pub(crate) fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
