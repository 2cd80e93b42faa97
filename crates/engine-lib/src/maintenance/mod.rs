//! Downtime episode detection
//!
//! Finds runs of "down" status samples, classifies each as planned
//! maintenance or an outage, and summarises when downtime tends to recur.

mod detector;

pub use detector::MaintenanceDetector;

use crate::error::{EngineError, EngineResult};
use crate::models::{BusinessHours, MetricName};
use chrono::{DateTime, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Status values strictly below this count as down
pub const DEFAULT_DOWN_THRESHOLD: f64 = 0.1;

/// Episodes shorter than this many samples are discarded
pub const MIN_EPISODE_SAMPLES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub down_threshold: f64,
    pub min_episode_samples: usize,
    pub business_hours: BusinessHours,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            down_threshold: DEFAULT_DOWN_THRESHOLD,
            min_episode_samples: MIN_EPISODE_SAMPLES,
            business_hours: BusinessHours::default(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.down_threshold.is_finite() {
            return Err(EngineError::configuration("down_threshold must be finite"));
        }
        if self.min_episode_samples == 0 {
            return Err(EngineError::configuration(
                "min_episode_samples must be at least 1",
            ));
        }
        self.business_hours.validate()
    }
}

/// A contiguous low-health episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: i64,
    pub sample_count: usize,
    pub min_health_score_during: f64,
    pub affected_metrics: BTreeSet<MetricName>,
    pub is_maintenance: bool,
}

impl Event {
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes)
    }
}

/// Downtime that repeats at the same hours or on the same weekdays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurringWindow {
    RecurringHourly {
        hours: Vec<u32>,
        frequency: f64,
        confidence: f64,
        description: String,
    },
    RecurringDaily {
        days: Vec<Weekday>,
        frequency: f64,
        confidence: f64,
        description: String,
    },
}

impl RecurringWindow {
    pub fn confidence(&self) -> f64 {
        match self {
            RecurringWindow::RecurringHourly { confidence, .. }
            | RecurringWindow::RecurringDaily { confidence, .. } => *confidence,
        }
    }
}

/// When downtime tends to happen for one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub high_risk_hours: Vec<u32>,
    pub high_risk_days: Vec<Weekday>,
    /// Share of weekend samples that were down
    pub weekend_risk: f64,
    /// Share of business-hour samples that were down
    pub business_hours_risk: f64,
    pub recurring_windows: Vec<RecurringWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_maintenance: Option<DateTime<Utc>>,
}

/// Detector output for one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DowntimeAnalysis {
    pub events: Vec<Event>,
    pub recurrence: RecurrencePattern,
}

impl DowntimeAnalysis {
    pub fn maintenance_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.is_maintenance)
    }

    pub fn outages(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| !e.is_maintenance)
    }
}

pub(crate) fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
