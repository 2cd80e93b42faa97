//! Hour-by-hour downtime risk forecast
//!
//! Combines the recurrence pattern of past downtime with the current health
//! score and its recent trend into a risk score per upcoming hour.

use super::*;
use crate::maintenance::RecurrencePattern;
use crate::models::{finite, is_weekend, parse_duration_label};
use chrono::{Datelike, Duration, Timelike};

/// Default number of hourly slots to forecast
pub const DEFAULT_HORIZON_HOURS: u32 = 24;

/// Longest supported horizon (one week)
pub const MAX_HORIZON_HOURS: u32 = 168;

/// Timeline samples the health trend is measured over
pub const TREND_SAMPLES: usize = 24;

/// Risk contributions and cut-offs for the forecast
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub base_risk: f64,
    pub high_risk_hour_weight: f64,
    pub high_risk_day_weight: f64,
    /// Multiplier applied to the weekend down rate on weekend slots
    pub weekend_weight: f64,
    pub declining_trend_weight: f64,
    pub improving_trend_relief: f64,
    /// Health-score points per sample beyond which the trend counts
    pub trend_threshold: f64,
    pub low_health_score: f64,
    pub low_health_weight: f64,
    pub moderate_health_score: f64,
    pub moderate_health_weight: f64,
    /// Slots above this risk become windows
    pub report_threshold: f64,
    /// Windows above this risk are HIGH, otherwise MEDIUM
    pub high_risk_threshold: f64,
    pub maintenance_overdue_days: i64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_risk: 0.1,
            high_risk_hour_weight: 0.3,
            high_risk_day_weight: 0.2,
            weekend_weight: 0.5,
            declining_trend_weight: 0.2,
            improving_trend_relief: 0.1,
            trend_threshold: 1.0,
            low_health_score: 50.0,
            low_health_weight: 0.3,
            moderate_health_score: 70.0,
            moderate_health_weight: 0.1,
            report_threshold: 0.4,
            high_risk_threshold: 0.6,
            maintenance_overdue_days: 30,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.report_threshold) || !unit.contains(&self.high_risk_threshold) {
            return Err(EngineError::configuration(
                "forecast thresholds must lie within [0, 1]",
            ));
        }
        if self.report_threshold > self.high_risk_threshold {
            return Err(EngineError::configuration(
                "report_threshold must not exceed high_risk_threshold",
            ));
        }
        if self.low_health_score > self.moderate_health_score {
            return Err(EngineError::configuration(
                "low_health_score must not exceed moderate_health_score",
            ));
        }
        Ok(())
    }
}

/// Parse a horizon label such as `"24h"` or `"2d"` into whole hours
pub fn parse_horizon(label: &str) -> EngineResult<u32> {
    let duration = parse_duration_label(label)?;
    if duration.num_seconds() % 3600 != 0 {
        return Err(EngineError::configuration(format!(
            "horizon '{}' must be a whole number of hours",
            label
        )));
    }
    let hours = duration.num_hours();
    if hours > MAX_HORIZON_HOURS as i64 {
        return Err(EngineError::configuration(format!(
            "horizon '{}' exceeds {} hours",
            label, MAX_HORIZON_HOURS
        )));
    }
    Ok(hours as u32)
}

/// An upcoming hour with elevated downtime risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWindow {
    pub start_time: DateTime<Utc>,
    pub hour: u32,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub contributing_factors: Vec<String>,
}

/// Summary of recent health behaviour feeding the forecast
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskTrends {
    pub current_health_score: f64,
    /// Mean change per sample over the last 24 samples
    pub health_trend_24h: f64,
    pub critical_incidents_24h: usize,
    pub avg_health_score: f64,
}

impl RiskTrends {
    /// Derive trends from a scored timeline; `current` overrides the last
    /// timeline score when given
    pub fn from_timeline(timeline: &[HealthPoint], current: Option<f64>) -> Self {
        let Some(last) = timeline.last() else {
            return Self {
                current_health_score: current.unwrap_or(100.0),
                ..Self::default()
            };
        };
        let skip = timeline.len().saturating_sub(TREND_SAMPLES);
        let recent: Vec<f64> = timeline[skip..].iter().map(|p| p.score).collect();
        let trend = if recent.len() > 1 {
            (recent[recent.len() - 1] - recent[0]) / (recent.len() - 1) as f64
        } else {
            0.0
        };
        let avg = timeline.iter().map(|p| p.score).sum::<f64>() / timeline.len() as f64;

        Self {
            current_health_score: current.unwrap_or(last.score),
            health_trend_24h: finite(trend),
            critical_incidents_24h: recent
                .iter()
                .filter(|s| RiskLevel::from_score(**s) == RiskLevel::Critical)
                .count(),
            avg_health_score: finite(avg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecommendation {
    pub urgency: RiskLevel,
    pub reason: String,
    pub suggested_window: String,
    pub estimated_duration: String,
}

/// Forecast for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskForecast {
    pub entity_id: String,
    pub generated_at: DateTime<Utc>,
    pub horizon_hours: u32,
    pub windows: Vec<RiskWindow>,
    /// Mean risk of the reported windows, 0 when there are none
    pub overall_risk_score: f64,
    pub trends: RiskTrends,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_recommendation: Option<MaintenanceRecommendation>,
}

impl RiskForecast {
    pub fn has_risk(&self) -> bool {
        !self.windows.is_empty()
    }

    pub fn peak_window(&self) -> Option<&RiskWindow> {
        self.windows.iter().max_by(|a, b| {
            a.risk_score
                .partial_cmp(&b.risk_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Produces hourly risk windows from recurrence and health history
#[derive(Debug, Clone)]
pub struct RiskForecaster {
    config: ForecastConfig,
}

impl RiskForecaster {
    pub fn new(config: ForecastConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn forecast(
        &self,
        entity_id: &str,
        now: DateTime<Utc>,
        horizon_hours: u32,
        trends: RiskTrends,
        recurrence: &RecurrencePattern,
    ) -> RiskForecast {
        let c = &self.config;
        let mut windows = Vec::new();

        for offset in 0..horizon_hours {
            let slot = now + Duration::hours(offset as i64);
            let hour = slot.hour();
            let weekend = is_weekend(&slot);
            let in_high_risk_hour = recurrence.high_risk_hours.contains(&hour);
            let mut factors = Vec::new();

            let mut risk = c.base_risk;
            if in_high_risk_hour {
                risk += c.high_risk_hour_weight;
                factors.push("Historical hour pattern".to_string());
            }
            if recurrence.high_risk_days.contains(&slot.weekday()) {
                risk += c.high_risk_day_weight;
                factors.push("Historical day pattern".to_string());
            }
            if weekend {
                risk += recurrence.weekend_risk * c.weekend_weight;
                if recurrence.weekend_risk > 0.1 {
                    factors.push("Weekend pattern".to_string());
                }
            }
            if trends.health_trend_24h < -c.trend_threshold {
                risk += c.declining_trend_weight;
                factors.push("Declining health trend".to_string());
            } else if trends.health_trend_24h > c.trend_threshold {
                risk -= c.improving_trend_relief;
            }
            if trends.current_health_score < c.low_health_score {
                risk += c.low_health_weight;
            } else if trends.current_health_score < c.moderate_health_score {
                risk += c.moderate_health_weight;
            }
            if trends.current_health_score < c.moderate_health_score {
                factors.push(format!(
                    "Current low health score ({:.1})",
                    trends.current_health_score
                ));
            }

            let risk = finite(risk).clamp(0.0, 1.0);
            if risk > c.report_threshold {
                windows.push(RiskWindow {
                    start_time: slot,
                    hour,
                    risk_score: risk,
                    risk_level: if risk > c.high_risk_threshold {
                        RiskLevel::High
                    } else {
                        RiskLevel::Medium
                    },
                    contributing_factors: factors,
                });
            }
        }

        let overall = if windows.is_empty() {
            0.0
        } else {
            windows.iter().map(|w| w.risk_score).sum::<f64>() / windows.len() as f64
        };

        let maintenance_recommendation = recurrence.last_maintenance.and_then(|last| {
            let days = (now - last).num_days();
            (days > c.maintenance_overdue_days).then(|| MaintenanceRecommendation {
                urgency: RiskLevel::High,
                reason: format!("No maintenance detected in {} days", days),
                suggested_window: "Weekend non-business hours".to_string(),
                estimated_duration: "30-60 minutes".to_string(),
            })
        });

        RiskForecast {
            entity_id: entity_id.to_string(),
            generated_at: now,
            horizon_hours,
            windows,
            overall_risk_score: overall,
            trends,
            maintenance_recommendation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn forecaster() -> RiskForecaster {
        RiskForecaster::new(ForecastConfig::default()).unwrap()
    }

    fn monday_midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
    }

    fn healthy_trends() -> RiskTrends {
        RiskTrends {
            current_health_score: 98.0,
            health_trend_24h: 0.0,
            critical_incidents_24h: 0,
            avg_health_score: 98.0,
        }
    }

    #[test]
    fn test_parse_horizon() {
        assert_eq!(parse_horizon("24h").unwrap(), 24);
        assert_eq!(parse_horizon("6h").unwrap(), 6);
        assert_eq!(parse_horizon("2d").unwrap(), 48);
        assert!(parse_horizon("90m").is_err());
        assert!(parse_horizon("30d").is_err());
        assert!(parse_horizon("soon").is_err());
    }

    #[test]
    fn test_healthy_history_has_no_windows() {
        let f = forecaster().forecast(
            "hdfc",
            monday_midnight(),
            24,
            healthy_trends(),
            &RecurrencePattern::default(),
        );
        assert!(f.windows.is_empty());
        assert_eq!(f.overall_risk_score, 0.0);
        assert!(f.maintenance_recommendation.is_none());
    }

    #[test]
    fn test_high_risk_hour_and_low_health() {
        let recurrence = RecurrencePattern {
            high_risk_hours: vec![2],
            ..RecurrencePattern::default()
        };
        let trends = RiskTrends {
            current_health_score: 65.0,
            ..healthy_trends()
        };
        let f = forecaster().forecast("hdfc", monday_midnight(), 24, trends, &recurrence);

        // 0.1 base + 0.1 moderate health everywhere, + 0.3 at 02:00
        assert_eq!(f.windows.len(), 1);
        let w = &f.windows[0];
        assert_eq!(w.hour, 2);
        assert!((w.risk_score - 0.5).abs() < 1e-9);
        assert_eq!(w.risk_level, RiskLevel::Medium);
        assert!(w
            .contributing_factors
            .contains(&"Historical hour pattern".to_string()));
        assert!(w
            .contributing_factors
            .contains(&"Current low health score (65.0)".to_string()));
    }

    #[test]
    fn test_declining_trend_on_high_risk_day() {
        let recurrence = RecurrencePattern {
            high_risk_days: vec![Weekday::Mon],
            ..RecurrencePattern::default()
        };
        let trends = RiskTrends {
            health_trend_24h: -2.5,
            ..healthy_trends()
        };
        let f = forecaster().forecast("hdfc", monday_midnight(), 48, trends, &recurrence);
        // Monday slots: 0.1 + 0.2 + 0.2 = 0.5 -> MEDIUM; Tuesday: 0.3 -> not reported
        assert_eq!(f.windows.len(), 24);
        assert!(f.windows.iter().all(|w| w.risk_level == RiskLevel::Medium));
        assert!((f.overall_risk_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_risk_clamped_to_unit_interval() {
        let recurrence = RecurrencePattern {
            high_risk_hours: (0..24).collect(),
            high_risk_days: vec![Weekday::Sat, Weekday::Sun],
            weekend_risk: 1.0,
            ..RecurrencePattern::default()
        };
        let trends = RiskTrends {
            current_health_score: 10.0,
            health_trend_24h: -5.0,
            ..healthy_trends()
        };
        // 2024-01-06 is a Saturday
        let now = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap();
        let f = forecaster().forecast("hdfc", now, 24, trends, &recurrence);
        assert_eq!(f.windows.len(), 24);
        assert!(f.windows.iter().all(|w| w.risk_score == 1.0));
    }

    #[test]
    fn test_overdue_maintenance_recommended() {
        let now = monday_midnight();
        let recurrence = RecurrencePattern {
            last_maintenance: Some(now - Duration::days(45)),
            ..RecurrencePattern::default()
        };
        let f = forecaster().forecast("hdfc", now, 24, healthy_trends(), &recurrence);
        let rec = f.maintenance_recommendation.unwrap();
        assert_eq!(rec.urgency, RiskLevel::High);
        assert_eq!(rec.reason, "No maintenance detected in 45 days");
    }

    #[test]
    fn test_trends_from_timeline() {
        let start = monday_midnight();
        let timeline: Vec<HealthPoint> = (0..48)
            .map(|i| HealthPoint {
                timestamp: start + Duration::hours(i),
                score: if i < 24 { 100.0 } else { 100.0 - (i - 23) as f64 * 3.0 },
                risk_factors: vec![],
            })
            .collect();
        let trends = RiskTrends::from_timeline(&timeline, None);
        assert!(trends.health_trend_24h < -1.0);
        assert_eq!(trends.current_health_score, 100.0 - 24.0 * 3.0);
        assert_eq!(trends.critical_incidents_24h, 1);

        let empty = RiskTrends::from_timeline(&[], None);
        assert_eq!(empty.current_health_score, 100.0);
        assert_eq!(empty.health_trend_24h, 0.0);
    }

    #[test]
    fn test_trend_uses_last_samples_at_sub_hourly_step() {
        let start = monday_midnight();
        let mut scores = vec![100.0; 72];
        scores.extend((1..=24).map(|k| 100.0 - 2.0 * k as f64));
        let timeline: Vec<HealthPoint> = scores
            .iter()
            .enumerate()
            .map(|(i, score)| HealthPoint {
                timestamp: start + Duration::minutes(15 * i as i64),
                score: *score,
                risk_factors: vec![],
            })
            .collect();

        let trends = RiskTrends::from_timeline(&timeline, None);
        assert_eq!(trends.health_trend_24h, -2.0);
        assert_eq!(trends.current_health_score, 52.0);

        let recurrence = RecurrencePattern {
            high_risk_hours: vec![2],
            ..RecurrencePattern::default()
        };
        let f = forecaster().forecast("hdfc", monday_midnight(), 24, trends, &recurrence);
        let window = f.windows.iter().find(|w| w.hour == 2).unwrap();
        assert!(window
            .contributing_factors
            .contains(&"Declining health trend".to_string()));
    }
}
