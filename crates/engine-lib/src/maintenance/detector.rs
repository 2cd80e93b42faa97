//! Episode grouping, maintenance classification and recurrence analysis

use super::*;
use crate::models::{is_weekend, EntitySeries, MetricSeries};
use crate::scoring::HealthPoint;
use chrono::{Datelike, Timelike};
use std::collections::BTreeMap;
use tracing::debug;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Detects maintenance windows and outages from a status series
#[derive(Debug, Clone)]
pub struct MaintenanceDetector {
    config: DetectorConfig,
}

impl MaintenanceDetector {
    pub fn new(config: DetectorConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run episode detection and recurrence analysis for one entity
    pub fn analyze(
        &self,
        entity: &EntitySeries,
        timeline: Option<&[HealthPoint]>,
    ) -> EngineResult<DowntimeAnalysis> {
        let status = entity
            .get(MetricName::Status)
            .filter(|s| !s.values().is_empty())
            .ok_or_else(|| {
                EngineError::data_unavailable(format!(
                    "no status series for {}",
                    entity.entity_id
                ))
            })?;

        let events = self.detect(status, timeline);
        let recurrence = self.recurrence(status, &events);

        debug!(
            entity_id = %entity.entity_id,
            events = events.len(),
            maintenance = events.iter().filter(|e| e.is_maintenance).count(),
            high_risk_hours = ?recurrence.high_risk_hours,
            "Downtime analysis completed"
        );

        Ok(DowntimeAnalysis { events, recurrence })
    }

    fn is_down(&self, value: f64) -> bool {
        value < self.config.down_threshold
    }

    /// Group consecutive down samples into events.
    ///
    /// Missing samples neither extend nor break an episode; any observed
    /// non-down sample ends it.
    pub fn detect(&self, status: &MetricSeries, timeline: Option<&[HealthPoint]>) -> Vec<Event> {
        let step = status.inferred_step().unwrap_or_else(Duration::zero);
        let mut episodes: Vec<Vec<(DateTime<Utc>, f64)>> = Vec::new();
        let mut current: Vec<(DateTime<Utc>, f64)> = Vec::new();

        for (ts, value) in status.observations() {
            if self.is_down(value) {
                current.push((ts, value));
            } else if !current.is_empty() {
                episodes.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            episodes.push(current);
        }

        episodes
            .into_iter()
            .filter(|e| e.len() >= self.config.min_episode_samples)
            .map(|samples| self.build_event(&status.entity_id, &samples, step, timeline))
            .collect()
    }

    fn build_event(
        &self,
        entity_id: &str,
        samples: &[(DateTime<Utc>, f64)],
        step: Duration,
        timeline: Option<&[HealthPoint]>,
    ) -> Event {
        let start = samples[0].0;
        let end = samples[samples.len() - 1].0 + step;
        let is_maintenance = !samples
            .iter()
            .any(|(ts, _)| self.config.business_hours.contains(ts));

        let mut affected = BTreeSet::from([MetricName::Status]);
        let during: Vec<&HealthPoint> = timeline
            .unwrap_or(&[])
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp < end)
            .collect();

        let min_health = if during.is_empty() {
            samples.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min) * 100.0
        } else {
            for p in &during {
                affected.extend(p.risk_factors.iter().copied());
            }
            during.iter().map(|p| p.score).fold(f64::INFINITY, f64::min)
        };

        Event {
            entity_id: entity_id.to_string(),
            start,
            end,
            duration_minutes: (end - start).num_minutes(),
            sample_count: samples.len(),
            min_health_score_during: min_health.clamp(0.0, 100.0),
            affected_metrics: affected,
            is_maintenance,
        }
    }

    /// Hours and weekdays where downtime concentrates, plus weekend and
    /// business-hour down rates
    pub fn recurrence(&self, status: &MetricSeries, events: &[Event]) -> RecurrencePattern {
        let observed: Vec<(DateTime<Utc>, f64)> = status.observations().collect();
        let down: Vec<DateTime<Utc>> = observed
            .iter()
            .filter(|(_, v)| self.is_down(*v))
            .map(|(ts, _)| *ts)
            .collect();

        let mut by_hour: BTreeMap<u32, usize> = BTreeMap::new();
        let mut by_day: BTreeMap<u32, usize> = BTreeMap::new();
        for ts in &down {
            *by_hour.entry(ts.hour()).or_default() += 1;
            *by_day.entry(ts.weekday().num_days_from_monday()).or_default() += 1;
        }
        let high_risk_hours = above_mean(&by_hour);
        let high_risk_days: Vec<Weekday> = above_mean(&by_day)
            .into_iter()
            .map(|d| WEEKDAYS[d as usize])
            .collect();

        let weekend_risk = down_rate(&observed, is_weekend, |v| self.is_down(v));
        let business_hours_risk = down_rate(
            &observed,
            |ts| self.config.business_hours.contains(ts),
            |v| self.is_down(v),
        );

        let mut recurring_windows = Vec::new();
        if !observed.is_empty() {
            let frequency = down.len() as f64 / observed.len() as f64;
            if !high_risk_hours.is_empty() {
                let hours: Vec<String> = high_risk_hours
                    .iter()
                    .map(|h| format!("{:02}:00", h))
                    .collect();
                recurring_windows.push(RecurringWindow::RecurringHourly {
                    hours: high_risk_hours.clone(),
                    frequency,
                    confidence: (down.len() as f64 / 10.0).min(1.0),
                    description: format!("Recurring downtime during hours: {}", hours.join(", ")),
                });
            }
            if !high_risk_days.is_empty() {
                let names: Vec<&str> = high_risk_days.iter().map(|d| weekday_name(*d)).collect();
                recurring_windows.push(RecurringWindow::RecurringDaily {
                    days: high_risk_days.clone(),
                    frequency,
                    confidence: (down.len() as f64 / 5.0).min(1.0),
                    description: format!("Recurring downtime on: {}", names.join(", ")),
                });
            }
        }

        RecurrencePattern {
            high_risk_hours,
            high_risk_days,
            weekend_risk,
            business_hours_risk,
            recurring_windows,
            last_maintenance: events
                .iter()
                .filter(|e| e.is_maintenance)
                .map(|e| e.start)
                .max(),
        }
    }
}

/// Keys whose count is strictly greater than the mean count
fn above_mean(counts: &BTreeMap<u32, usize>) -> Vec<u32> {
    if counts.is_empty() {
        return Vec::new();
    }
    let mean = counts.values().sum::<usize>() as f64 / counts.len() as f64;
    counts
        .iter()
        .filter(|(_, c)| **c as f64 > mean)
        .map(|(k, _)| *k)
        .collect()
}

fn down_rate(
    observed: &[(DateTime<Utc>, f64)],
    in_group: impl Fn(&DateTime<Utc>) -> bool,
    is_down: impl Fn(f64) -> bool,
) -> f64 {
    let group: Vec<f64> = observed
        .iter()
        .filter(|(ts, _)| in_group(ts))
        .map(|(_, v)| *v)
        .collect();
    if group.is_empty() {
        return 0.0;
    }
    group.iter().filter(|v| is_down(**v)).count() as f64 / group.len() as f64
}
