//! Alert checks over the current snapshot and the short-term window

use super::*;
use crate::features::stats::{linear_regression_slope, mean, rolling_means, std_dev};
use crate::features::FeatureSet;
use crate::models::{finite, EntitySeries, MetricSnapshot};
use crate::scoring::RiskForecast;
use chrono::Duration;
use tracing::debug;

const ACCELERATING_CONFIDENCE: f64 = 0.82;
const DIVERGENCE_CONFIDENCE: f64 = 0.88;
const STABILITY_CONFIDENCE: f64 = 0.75;
const ANOMALY_CONFIDENCE: f64 = 0.7;

/// Success-rate metrics checked for decline, divergence and variability
const RATE_METRICS: [MetricName; 2] = [
    MetricName::ConsentSuccessRate,
    MetricName::DataFetchSuccessRate,
];

/// Everything the generator looks at for one entity
#[derive(Debug, Clone, Copy)]
pub struct AlertInput<'a> {
    pub snapshot: &'a MetricSnapshot,
    pub series: &'a EntitySeries,
    pub now: DateTime<Utc>,
    pub features: Option<&'a FeatureSet>,
    pub forecast: Option<&'a RiskForecast>,
}

impl<'a> AlertInput<'a> {
    pub fn new(snapshot: &'a MetricSnapshot, series: &'a EntitySeries, now: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            series,
            now,
            features: None,
            forecast: None,
        }
    }

    pub fn with_features(mut self, features: &'a FeatureSet) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_forecast(mut self, forecast: &'a RiskForecast) -> Self {
        self.forecast = Some(forecast);
        self
    }
}

/// An alert before context, id and timestamp are attached
struct Finding {
    severity: AlertSeverity,
    alert_type: AlertType,
    metric: Option<MetricName>,
    message: String,
    metrics: AlertMetrics,
    actions: Vec<String>,
    confidence: f64,
}

#[derive(Debug, Clone)]
pub struct AlertGenerator {
    config: AlertConfig,
}

impl AlertGenerator {
    pub fn new(config: AlertConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Run every check and return deduplicated, prioritized alerts
    pub fn generate(&self, input: &AlertInput<'_>) -> Vec<Alert> {
        let start = input.now - Duration::minutes(self.config.short_window_minutes);
        let short = input.series.slice(start, input.now);

        let mut findings = self.threshold_violations(input, &short);
        findings.extend(self.accelerating_declines(input, &short));
        findings.extend(self.divergence(input));
        findings.extend(self.stability_issues(input, &short));
        findings.extend(self.status_change(input, &short));
        findings.extend(self.anomaly_bursts(input));
        findings.extend(self.predicted_risk(input));

        let context = self.context(input, &short);
        let alerts: Vec<Alert> = findings
            .into_iter()
            .map(|f| self.finish(input, &context, f))
            .collect();

        let raised = alerts.len();
        let mut alerts = deduplicate(alerts);
        prioritize(&mut alerts);

        debug!(
            entity_id = %input.snapshot.entity_id,
            raised,
            kept = alerts.len(),
            "Alerts generated"
        );

        alerts
    }

    fn finish(&self, input: &AlertInput<'_>, context: &AlertContext, mut f: Finding) -> Alert {
        f.actions.truncate(self.config.max_actions);
        let entity_id = input.snapshot.entity_id.clone();
        Alert {
            alert_id: format!(
                "{}_{}_{}_{}",
                entity_id,
                f.alert_type,
                f.severity,
                input.now.format("%Y%m%d_%H%M%S")
            ),
            entity_id,
            severity: f.severity,
            alert_type: f.alert_type,
            metric: f.metric,
            message: f.message,
            metrics: AlertMetrics {
                current_rate: finite(f.metrics.current_rate),
                historical_avg: finite(f.metrics.historical_avg),
                deviation: finite(f.metrics.deviation),
                threshold: finite(f.metrics.threshold),
            },
            context: context.clone(),
            recommended_actions: f.actions,
            confidence: finite(f.confidence).clamp(0.0, 1.0),
            timestamp: input.now,
        }
    }

    /// Short-window trend oriented so that negative always means worse
    fn oriented_trend(&self, metric: MetricName, values: &[f64]) -> f64 {
        let trend = window_trend(values);
        let inverted = self
            .config
            .thresholds
            .get(&metric)
            .map(|t| t.inverted)
            .unwrap_or(false);
        if inverted {
            -trend
        } else {
            trend
        }
    }

    fn threshold_violations(&self, input: &AlertInput<'_>, short: &EntitySeries) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (metric, threshold) in &self.config.thresholds {
            let Some(current) = input.snapshot.get(*metric) else {
                continue;
            };
            if !threshold.breaches_warning(current) {
                continue;
            }

            let values = short.get(*metric).map(|s| s.values()).unwrap_or_default();
            let trend = self.oriented_trend(*metric, &values);
            let rapid = trend < self.config.rapid_decline;
            let critical_breach = threshold.breaches_critical(current);
            let severity = match (critical_breach, rapid) {
                (true, true) => AlertSeverity::Critical,
                (true, false) | (false, true) => AlertSeverity::Warning,
                (false, false) => AlertSeverity::Info,
            };
            let bound = if critical_breach {
                threshold.critical
            } else {
                threshold.warning
            };
            let historical_avg = if values.is_empty() {
                threshold.baseline
            } else {
                mean(&values)
            };

            findings.push(Finding {
                severity,
                alert_type: AlertType::ThresholdViolation,
                metric: Some(*metric),
                message: self.threshold_message(input, *metric, threshold, current, trend, severity),
                metrics: AlertMetrics {
                    current_rate: current,
                    historical_avg,
                    deviation: trend,
                    threshold: bound,
                },
                actions: self.recommended_actions(*metric, severity, trend),
                confidence: if rapid { 0.95 } else { 0.85 },
            });
        }
        findings
    }

    fn threshold_message(
        &self,
        input: &AlertInput<'_>,
        metric: MetricName,
        threshold: &AlertThreshold,
        current: f64,
        trend: f64,
        severity: AlertSeverity,
    ) -> String {
        let label = match severity {
            AlertSeverity::Critical => "Critical",
            AlertSeverity::Warning => "Warning",
            AlertSeverity::Info => "Notice",
        };
        let direction = if trend < self.config.rapid_decline {
            "declining rapidly"
        } else if trend < 0.0 {
            "declining gradually"
        } else {
            "stable"
        };
        let window = window_label(self.config.short_window_minutes);
        if threshold.inverted {
            format!(
                "{}: {} for {} is {:.2}s, above threshold and {} (trend: {:+.2}s over {})",
                label,
                words(metric),
                input.snapshot.entity_id,
                current,
                direction,
                -trend,
                window
            )
        } else {
            format!(
                "{}: {} for {} is {:.1}%, below threshold and {} (trend: {:.1}% over {})",
                label,
                words(metric),
                input.snapshot.entity_id,
                current,
                direction,
                trend,
                window
            )
        }
    }

    fn recommended_actions(&self, metric: MetricName, severity: AlertSeverity, trend: f64) -> Vec<String> {
        let mut actions: Vec<&str> = if severity == AlertSeverity::Critical {
            vec![
                "Immediately investigate system logs",
                "Check for recent deployments or changes",
                "Monitor error rates and patterns",
                "Prepare incident response if trend continues",
            ]
        } else {
            vec![
                "Monitor system performance",
                "Review error logs for patterns",
                "Prepare for potential escalation",
            ]
        };
        if trend < self.config.rapid_decline {
            actions.extend([
                "Analyze recent system changes",
                "Check service dependencies",
                "Review capacity metrics",
            ]);
        }
        match metric {
            MetricName::ConsentSuccessRate => actions.extend([
                "Verify authentication service health",
                "Check consent flow configuration",
            ]),
            MetricName::DataFetchSuccessRate => actions.extend([
                "Check data source connectivity",
                "Verify API permissions and quotas",
            ]),
            MetricName::ResponseTime => {
                actions.push("Check provider system load and contact technical support")
            }
            _ => {}
        }
        actions.truncate(self.config.max_actions);
        actions.into_iter().map(String::from).collect()
    }

    fn accelerating_declines(&self, input: &AlertInput<'_>, short: &EntitySeries) -> Vec<Finding> {
        let mut findings = Vec::new();
        for metric in RATE_METRICS {
            let Some(series) = short.get(metric) else {
                continue;
            };
            let Some(step) = series
                .inferred_step()
                .or_else(|| input.series.get(metric).and_then(|s| s.inferred_step()))
            else {
                continue;
            };
            let values = series.values();
            if values.len() < 2 {
                continue;
            }

            let trends: Vec<f64> = self
                .config
                .acceleration_windows_minutes
                .iter()
                .map(|w| rolling_trend(&values, samples_per_window(*w, step)))
                .collect();
            let declining = trends.iter().all(|t| *t < 0.0);
            let accelerating = trends.windows(2).all(|w| w[0] < w[1]);
            if !(declining && accelerating) {
                continue;
            }

            let parts: Vec<String> = trends
                .iter()
                .zip(&self.config.acceleration_windows_minutes)
                .map(|(t, w)| format!("-{:.1}% ({})", t.abs(), short_window_label(*w)))
                .collect();
            findings.push(Finding {
                severity: AlertSeverity::Warning,
                alert_type: AlertType::AcceleratingDecline,
                metric: Some(metric),
                message: format!(
                    "Accelerating decline detected in {}: {}",
                    words(metric),
                    parts.join(", ")
                ),
                metrics: AlertMetrics {
                    current_rate: current_or_last(input.snapshot, metric, &values),
                    historical_avg: mean(&values),
                    deviation: trends[0],
                    threshold: self.config.rapid_decline,
                },
                actions: self.recommended_actions(metric, AlertSeverity::Warning, trends[0]),
                confidence: ACCELERATING_CONFIDENCE,
            });
        }
        findings
    }

    fn divergence(&self, input: &AlertInput<'_>) -> Option<Finding> {
        let consent = input.snapshot.get(MetricName::ConsentSuccessRate)?;
        let fetch = input.snapshot.get(MetricName::DataFetchSuccessRate)?;
        let gap = (consent - fetch).abs();
        if gap <= self.config.divergence_points {
            return None;
        }

        let (worse, better, worse_metric) = if consent < fetch {
            ("consent", "data fetch", MetricName::ConsentSuccessRate)
        } else {
            ("data fetch", "consent", MetricName::DataFetchSuccessRate)
        };
        Some(Finding {
            severity: AlertSeverity::Warning,
            alert_type: AlertType::MetricDivergence,
            metric: Some(worse_metric),
            message: format!(
                "Unusual pattern: {} rate ({:.1}%) significantly lower than {} rate ({:.1}%)",
                worse,
                consent.min(fetch),
                better,
                consent.max(fetch)
            ),
            metrics: AlertMetrics {
                current_rate: consent.min(fetch),
                historical_avg: consent.max(fetch),
                deviation: gap,
                threshold: self.config.divergence_points,
            },
            actions: vec![
                format!("Investigate {} service health", worse),
                format!("Check {} API endpoints", worse),
                "Review error logs for specific failure patterns".to_string(),
                "Monitor service dependencies".to_string(),
            ],
            confidence: DIVERGENCE_CONFIDENCE,
        })
    }

    fn stability_issues(&self, input: &AlertInput<'_>, short: &EntitySeries) -> Vec<Finding> {
        let mut findings = Vec::new();
        for metric in RATE_METRICS {
            let values = short.get(metric).map(|s| s.values()).unwrap_or_default();
            if values.len() < 2 {
                continue;
            }
            let avg = mean(&values);
            if avg <= 0.0 {
                continue;
            }
            let std = std_dev(&values);
            let cv = std / avg * 100.0;
            if cv <= self.config.stability_cv_pct {
                continue;
            }
            findings.push(Finding {
                severity: AlertSeverity::Warning,
                alert_type: AlertType::StabilityIssue,
                metric: Some(metric),
                message: format!(
                    "High variability in {}: ±{:.1}% around mean of {:.1}%",
                    words(metric),
                    std,
                    avg
                ),
                metrics: AlertMetrics {
                    current_rate: current_or_last(input.snapshot, metric, &values),
                    historical_avg: avg,
                    deviation: std,
                    threshold: self.config.stability_cv_pct,
                },
                actions: vec![
                    "Monitor service stability".to_string(),
                    "Check for intermittent issues".to_string(),
                    "Review system resources".to_string(),
                    "Investigate potential network issues".to_string(),
                ],
                confidence: STABILITY_CONFIDENCE,
            });
        }
        findings
    }

    fn status_change(&self, input: &AlertInput<'_>, short: &EntitySeries) -> Option<Finding> {
        let status = input.snapshot.get(MetricName::Status)?;
        let entity = input.snapshot.entity_id.to_uppercase();
        let (severity, bound, message, action, confidence) = if status < self.config.status_critical {
            (
                AlertSeverity::Critical,
                self.config.status_critical,
                format!("{} status is CRITICAL - immediate attention required", entity),
                "Activate all emergency procedures and escalate to senior management",
                1.0,
            )
        } else if status <= self.config.status_degraded {
            (
                AlertSeverity::Warning,
                self.config.status_degraded,
                format!("{} status degraded - performance issues detected", entity),
                "Increase monitoring frequency and prepare contingency plans",
                0.85,
            )
        } else {
            return None;
        };

        let values = short
            .get(MetricName::Status)
            .map(|s| s.values())
            .unwrap_or_default();
        let historical_avg = if values.is_empty() { 1.0 } else { mean(&values) };
        Some(Finding {
            severity,
            alert_type: AlertType::StatusChange,
            metric: Some(MetricName::Status),
            message,
            metrics: AlertMetrics {
                current_rate: status,
                historical_avg,
                deviation: historical_avg - status,
                threshold: bound,
            },
            actions: vec![action.to_string()],
            confidence,
        })
    }

    fn anomaly_bursts(&self, input: &AlertInput<'_>) -> Vec<Finding> {
        let Some(features) = input.features else {
            return Vec::new();
        };
        features
            .anomaly
            .iter()
            .filter(|(_, a)| a.recent_anomalies > self.config.anomaly_burst)
            .map(|(metric, a)| Finding {
                severity: AlertSeverity::Warning,
                alert_type: AlertType::Anomaly,
                metric: Some(*metric),
                message: format!(
                    "{} showing unusual {} patterns ({} recent anomalies)",
                    input.snapshot.entity_id.to_uppercase(),
                    words(*metric),
                    a.recent_anomalies
                ),
                metrics: AlertMetrics {
                    current_rate: input.snapshot.get(*metric).unwrap_or(0.0),
                    historical_avg: features
                        .statistical
                        .get(metric)
                        .map(|s| s.mean)
                        .unwrap_or(0.0),
                    deviation: a.max_z_score,
                    threshold: self.config.anomaly_burst as f64,
                },
                actions: vec![
                    "Investigate root cause and verify provider system health".to_string(),
                ],
                confidence: ANOMALY_CONFIDENCE,
            })
            .collect()
    }

    /// `threshold` carries the lowest reported window risk
    fn predicted_risk(&self, input: &AlertInput<'_>) -> Option<Finding> {
        let forecast = input.forecast?;
        let peak = forecast.peak_window()?;
        let floor = forecast
            .windows
            .iter()
            .map(|w| w.risk_score)
            .fold(peak.risk_score, f64::min);

        let mut actions = vec![
            format!("Increase monitoring ahead of {:02}:00 UTC", peak.hour),
            "Prepare manual processing teams for potential activation".to_string(),
        ];
        if let Some(rec) = &forecast.maintenance_recommendation {
            actions.push(format!("Plan maintenance: {}", rec.reason));
        }

        Some(Finding {
            severity: AlertSeverity::Info,
            alert_type: AlertType::PredictedRisk,
            metric: None,
            message: format!(
                "Elevated downtime risk for {}: {} of the next {} hours at risk, peaking at {:.2} around {:02}:00 UTC",
                forecast.entity_id,
                forecast.windows.len(),
                forecast.horizon_hours,
                peak.risk_score,
                peak.hour
            ),
            metrics: AlertMetrics {
                current_rate: peak.risk_score,
                historical_avg: forecast.overall_risk_score,
                deviation: peak.risk_score - forecast.overall_risk_score,
                threshold: floor,
            },
            actions,
            confidence: forecast.overall_risk_score,
        })
    }

    fn context(&self, input: &AlertInput<'_>, short: &EntitySeries) -> AlertContext {
        let peak_hour = self.config.business_hours.contains(&input.now);
        let base = input.snapshot.user_base.unwrap_or(0);
        let affected_users = input
            .snapshot
            .get(MetricName::ConsentSuccessRate)
            .map(|consent| {
                let failing = (1.0 - consent / 100.0).clamp(0.0, 1.0);
                (base as f64 * failing).floor() as u64
            })
            .unwrap_or(0);

        let business_impact = if peak_hour
            && affected_users as f64 > base as f64 * self.config.severe_impact_fraction
        {
            "Severe impact on business operations during peak hours"
        } else if peak_hour {
            "Moderate impact on business operations"
        } else {
            "Limited business impact during off-hours"
        };

        AlertContext {
            affected_users,
            business_impact: business_impact.to_string(),
            historical_pattern: self.short_term_pattern(short),
            peak_hour,
        }
    }

    fn short_term_pattern(&self, short: &EntitySeries) -> String {
        let window = window_label(self.config.short_window_minutes);
        let mut variable = false;
        let mut declining = false;
        let mut improving = false;
        let mut seen = false;

        for metric in [
            MetricName::ConsentSuccessRate,
            MetricName::DataFetchSuccessRate,
            MetricName::ResponseTime,
        ] {
            let values = short.get(metric).map(|s| s.values()).unwrap_or_default();
            if values.is_empty() {
                continue;
            }
            seen = true;
            let trend = self.oriented_trend(metric, &values);
            if std_dev(&values) > self.config.variability_std {
                variable = true;
            } else if trend < self.config.gradual_decline {
                declining = true;
            } else if trend > self.config.improvement {
                improving = true;
            }
        }

        if !seen {
            "Insufficient short-term data".to_string()
        } else if variable {
            format!("Highly variable performance in last {}", window)
        } else if declining {
            format!("Declining performance trend in last {}", window)
        } else if improving {
            format!("Improving performance trend in last {}", window)
        } else {
            format!("Stable performance in last {}", window)
        }
    }
}

/// OLS slope scaled by the number of points: total change over the window
fn window_trend(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    finite(linear_regression_slope(values) * values.len() as f64)
}

/// Percentage change between the first and last full rolling mean
fn rolling_trend(values: &[f64], window: usize) -> f64 {
    let means = rolling_means(values, window);
    match (means.first(), means.last()) {
        (Some(first), Some(last)) if means.len() >= 2 && *first != 0.0 => {
            finite((last - first) / first * 100.0)
        }
        _ => 0.0,
    }
}

fn samples_per_window(window_minutes: i64, step: Duration) -> usize {
    let step_secs = step.num_seconds().max(1);
    ((window_minutes * 60) / step_secs).max(1) as usize
}

fn current_or_last(snapshot: &MetricSnapshot, metric: MetricName, values: &[f64]) -> f64 {
    snapshot
        .get(metric)
        .or_else(|| values.last().copied())
        .unwrap_or(0.0)
}

fn words(metric: MetricName) -> String {
    metric.as_str().replace('_', " ")
}

fn window_label(minutes: i64) -> String {
    match minutes {
        60 => "hour".to_string(),
        m if m % 60 == 0 => format!("{} hours", m / 60),
        m => format!("{} minutes", m),
    }
}

fn short_window_label(minutes: i64) -> String {
    if minutes % 60 == 0 {
        format!("{}hr", minutes / 60)
    } else {
        format!("{}min", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{AnomalyFeatures, AnomalySeverity};
    use crate::models::MetricSeries;
    use crate::scoring::{RiskLevel, RiskTrends, RiskWindow};
    use chrono::TimeZone;

    fn generator() -> AlertGenerator {
        AlertGenerator::new(AlertConfig::default()).unwrap()
    }

    /// Monday 14:00 UTC, inside business hours
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 14, 0, 0).unwrap()
    }

    fn series(metric: MetricName, values: &[f64]) -> MetricSeries {
        let step = Duration::minutes(15);
        let start = now() - step * (values.len() as i32 - 1);
        MetricSeries::from_values("hdfc", metric, start, step, values)
    }

    /// Consent falls from 35% to 20% and then stays flat for two hours
    fn declining_consent() -> EntitySeries {
        let mut values = vec![35.0, 31.25, 27.5, 23.75];
        values.extend([20.0; 9]);
        EntitySeries::new("hdfc").with_series(series(MetricName::ConsentSuccessRate, &values))
    }

    fn flat(metric: MetricName, value: f64) -> MetricSeries {
        series(metric, &[value; 13])
    }

    #[test]
    fn test_declining_consent_yields_one_critical_violation() {
        let entity = declining_consent();
        let snapshot = entity.snapshot(Some(1000)).unwrap();
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));

        let critical: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        let alert = critical[0];
        assert_eq!(alert.alert_type, AlertType::ThresholdViolation);
        assert_eq!(alert.metric, Some(MetricName::ConsentSuccessRate));
        assert_eq!(alert.metrics.current_rate, 20.0);
        assert_eq!(alert.metrics.threshold, 70.0);
        assert!(alert.metrics.deviation < -10.0);
        assert_eq!(alert.confidence, 0.95);
        assert!(alert.message.contains("declining rapidly"));
        assert_eq!(alert.recommended_actions.len(), MAX_RECOMMENDED_ACTIONS);
        assert_eq!(alerts[0].alert_id, alert.alert_id);
        assert_eq!(
            alert.alert_id,
            "hdfc_threshold_violation_critical_20240108_140000"
        );
    }

    #[test]
    fn test_declining_consent_also_flags_acceleration_and_variability() {
        let entity = declining_consent();
        let snapshot = entity.snapshot(None).unwrap();
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));

        let accelerating = alerts
            .iter()
            .find(|a| a.alert_type == AlertType::AcceleratingDecline)
            .unwrap();
        assert_eq!(accelerating.severity, AlertSeverity::Warning);
        assert!(accelerating.message.contains("(30min)"));
        assert!(accelerating.message.contains("(3hr)"));
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == AlertType::StabilityIssue));
    }

    #[test]
    fn test_context_for_declining_consent() {
        let entity = declining_consent();
        let snapshot = entity.snapshot(Some(1000)).unwrap();
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));
        let context = &alerts[0].context;
        assert_eq!(context.affected_users, 800);
        assert!(context.peak_hour);
        assert_eq!(
            context.business_impact,
            "Severe impact on business operations during peak hours"
        );
        assert_eq!(
            context.historical_pattern,
            "Declining performance trend in last 3 hours"
        );
    }

    #[test]
    fn test_flat_critical_value_is_only_a_warning() {
        let entity = EntitySeries::new("hdfc")
            .with_series(flat(MetricName::ConsentSuccessRate, 60.0));
        let snapshot = entity.snapshot(None).unwrap();
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].confidence, 0.85);
        assert_eq!(alerts[0].metrics.historical_avg, 60.0);
        assert_eq!(
            alerts[0].context.historical_pattern,
            "Stable performance in last 3 hours"
        );
    }

    #[test]
    fn test_warning_bound_breach_is_info() {
        let entity = EntitySeries::new("hdfc")
            .with_series(flat(MetricName::ConsentSuccessRate, 80.0));
        let snapshot = entity.snapshot(None).unwrap();
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Info);
        assert_eq!(alerts[0].metrics.threshold, 85.0);
    }

    #[test]
    fn test_healthy_entity_raises_nothing() {
        let entity = EntitySeries::new("hdfc")
            .with_series(flat(MetricName::ConsentSuccessRate, 97.0))
            .with_series(flat(MetricName::DataFetchSuccessRate, 95.0))
            .with_series(flat(MetricName::ResponseTime, 1.2))
            .with_series(flat(MetricName::Status, 1.0));
        let snapshot = entity.snapshot(Some(500)).unwrap();
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_slow_response_is_violation() {
        let entity =
            EntitySeries::new("hdfc").with_series(flat(MetricName::ResponseTime, 7.5));
        let snapshot = entity.snapshot(None).unwrap();
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, Some(MetricName::ResponseTime));
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert!(alerts[0].message.contains("above threshold"));
    }

    #[test]
    fn test_divergence() {
        let snapshot = MetricSnapshot::new("hdfc", now())
            .with_value(MetricName::ConsentSuccessRate, 95.0)
            .with_value(MetricName::DataFetchSuccessRate, 70.0);
        let entity = EntitySeries::new("hdfc");
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, now()));
        let divergence = alerts
            .iter()
            .find(|a| a.alert_type == AlertType::MetricDivergence)
            .unwrap();
        assert_eq!(divergence.metric, Some(MetricName::DataFetchSuccessRate));
        assert_eq!(divergence.metrics.deviation, 25.0);
        assert_eq!(divergence.confidence, 0.88);
        assert!(divergence.message.starts_with("Unusual pattern: data fetch rate"));
    }

    #[test]
    fn test_status_alerts() {
        let entity = EntitySeries::new("hdfc");
        let down = MetricSnapshot::new("hdfc", now()).with_value(MetricName::Status, 0.0);
        let alerts = generator().generate(&AlertInput::new(&down, &entity, now()));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::StatusChange);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].confidence, 1.0);

        let degraded = MetricSnapshot::new("hdfc", now()).with_value(MetricName::Status, 0.5);
        let alerts = generator().generate(&AlertInput::new(&degraded, &entity, now()));
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].confidence, 0.85);
    }

    #[test]
    fn test_anomaly_burst_needs_features() {
        let entity = EntitySeries::new("hdfc");
        let snapshot = MetricSnapshot::new("hdfc", now()).with_value(MetricName::ErrorRate, 2.0);
        let mut features = FeatureSet::empty("hdfc");
        features.anomaly.insert(
            MetricName::ErrorRate,
            AnomalyFeatures {
                total_anomalies: 6,
                anomaly_rate: 0.12,
                iqr_anomalies: 5,
                recent_anomalies: 4,
                max_z_score: 3.4,
                severity: AnomalySeverity::High,
            },
        );

        let without = generator().generate(&AlertInput::new(&snapshot, &entity, now()));
        assert!(without.is_empty());

        let input = AlertInput::new(&snapshot, &entity, now()).with_features(&features);
        let alerts = generator().generate(&input);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Anomaly);
        assert_eq!(alerts[0].confidence, 0.7);
        assert!(alerts[0].message.contains("HDFC showing unusual error rate patterns"));
    }

    #[test]
    fn test_predicted_risk_is_info_with_forecast_confidence() {
        let entity = EntitySeries::new("hdfc");
        let snapshot = MetricSnapshot::new("hdfc", now()).with_value(MetricName::Status, 1.0);
        let forecast = RiskForecast {
            entity_id: "hdfc".to_string(),
            generated_at: now(),
            horizon_hours: 24,
            windows: vec![
                RiskWindow {
                    start_time: now() + Duration::hours(2),
                    hour: 16,
                    risk_score: 0.5,
                    risk_level: RiskLevel::Medium,
                    contributing_factors: vec!["Historical hour pattern".to_string()],
                },
                RiskWindow {
                    start_time: now() + Duration::hours(3),
                    hour: 17,
                    risk_score: 0.7,
                    risk_level: RiskLevel::High,
                    contributing_factors: vec!["Historical hour pattern".to_string()],
                },
            ],
            overall_risk_score: 0.6,
            trends: RiskTrends::default(),
            maintenance_recommendation: None,
        };
        let input = AlertInput::new(&snapshot, &entity, now()).with_forecast(&forecast);
        let alerts = generator().generate(&input);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::PredictedRisk);
        assert_eq!(alerts[0].severity, AlertSeverity::Info);
        assert_eq!(alerts[0].confidence, 0.6);
        assert_eq!(alerts[0].metrics.current_rate, 0.7);
        assert_eq!(alerts[0].metrics.threshold, 0.5);
        assert!(alerts[0].recommended_actions[0].contains("17:00"));
    }

    #[test]
    fn test_off_hours_context() {
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 14, 0, 0).unwrap();
        let snapshot = MetricSnapshot::new("hdfc", saturday)
            .with_value(MetricName::ConsentSuccessRate, 50.0)
            .with_user_base(400);
        let entity = EntitySeries::new("hdfc");
        let alerts = generator().generate(&AlertInput::new(&snapshot, &entity, saturday));
        let context = &alerts[0].context;
        assert_eq!(context.affected_users, 200);
        assert!(!context.peak_hour);
        assert_eq!(context.business_impact, "Limited business impact during off-hours");
        assert_eq!(context.historical_pattern, "Insufficient short-term data");
    }

    #[test]
    fn test_rolling_trend() {
        assert_eq!(rolling_trend(&[10.0, 10.0, 5.0, 5.0], 2), -50.0);
        assert_eq!(rolling_trend(&[10.0], 2), 0.0);
        assert_eq!(samples_per_window(30, Duration::minutes(15)), 2);
        assert_eq!(samples_per_window(30, Duration::hours(1)), 1);
    }
}
