//! Per-entity analysis reports and the fleet-wide summary

use crate::alerts::{Alert, AlertSeverity};
use crate::features::{FeatureSet, StabilityGrade};
use crate::insights::Insight;
use crate::maintenance::DowntimeAnalysis;
use crate::models::{finite, MetricName};
use crate::scoring::{HealthScore, RiskForecast};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean consent success below this is a performance issue
pub const PERFORMANCE_WARNING_PCT: f64 = 70.0;

/// Mean consent success below this is a critical performance issue
pub const PERFORMANCE_CRITICAL_PCT: f64 = 50.0;

/// Everything one analysis pass produced for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity_id: String,
    pub generated_at: DateTime<Utc>,
    pub features: FeatureSet,
    pub downtime: DowntimeAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<RiskForecast>,
    pub alerts: Vec<Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<Insight>,
    /// Metrics whose query failed or returned nothing for this entity
    pub unavailable_metrics: Vec<MetricName>,
}

impl EntityReport {
    /// Report with no analysis results, used when an entity could not be analysed
    pub fn empty(entity_id: impl Into<String>, generated_at: DateTime<Utc>) -> Self {
        let entity_id = entity_id.into();
        Self {
            features: FeatureSet::empty(entity_id.clone()),
            entity_id,
            generated_at,
            downtime: DowntimeAnalysis::default(),
            health: None,
            forecast: None,
            alerts: Vec::new(),
            insight: None,
            unavailable_metrics: Vec::new(),
        }
    }

    pub fn health_score(&self) -> Option<f64> {
        self.health.as_ref().map(|h| h.score)
    }

    pub fn mean_consent(&self) -> Option<f64> {
        self.features
            .statistical
            .get(&MetricName::ConsentSuccessRate)
            .map(|s| s.mean)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceIssue {
    pub entity_id: String,
    /// Mean consent success rate over the window
    pub value: f64,
    pub severity: AlertSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityConcern {
    pub entity_id: String,
    pub grade: StabilityGrade,
    pub severity: AlertSeverity,
}

/// Fleet-wide roll-up of the latest reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub generated_at: Option<DateTime<Utc>>,
    pub entities_analyzed: usize,
    pub entities_with_data: usize,
    /// Mean completeness over every (entity, metric) pair
    pub avg_data_completeness: f64,
    /// Mean of per-entity mean consent success rates
    pub avg_consent_success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_health_score: Option<f64>,
    pub performance_issues: Vec<PerformanceIssue>,
    pub critical_performance_issues: usize,
    pub stability_concerns: Vec<StabilityConcern>,
    pub entities_with_maintenance_patterns: usize,
    pub total_maintenance_windows: usize,
    pub alert_counts: BTreeMap<AlertSeverity, usize>,
    pub immediate_attention: Vec<String>,
    pub monitoring_required: Vec<String>,
    pub stability_watchlist: Vec<String>,
}

impl FleetSummary {
    pub fn from_reports(reports: &[EntityReport], generated_at: DateTime<Utc>) -> Self {
        let mut summary = FleetSummary {
            generated_at: Some(generated_at),
            entities_analyzed: reports.len(),
            ..Self::default()
        };

        let mut completeness = Vec::new();
        let mut consent_means = Vec::new();
        let mut health_scores = Vec::new();

        for report in reports {
            if !report.features.data_quality.is_empty() {
                summary.entities_with_data += 1;
            }
            completeness.extend(
                report
                    .features
                    .data_quality
                    .values()
                    .map(|q| q.completeness_pct()),
            );
            health_scores.extend(report.health_score());

            if let Some(consent) = report.mean_consent() {
                consent_means.push(consent);
                if consent < PERFORMANCE_WARNING_PCT {
                    let severity = if consent < PERFORMANCE_CRITICAL_PCT {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };
                    summary.performance_issues.push(PerformanceIssue {
                        entity_id: report.entity_id.clone(),
                        value: consent,
                        severity,
                    });
                }
            }

            if let Some(overall) = &report.features.stability.overall {
                let severity = match overall.grade {
                    StabilityGrade::Poor => Some(AlertSeverity::Critical),
                    StabilityGrade::Fair => Some(AlertSeverity::Warning),
                    _ => None,
                };
                if let Some(severity) = severity {
                    summary.stability_concerns.push(StabilityConcern {
                        entity_id: report.entity_id.clone(),
                        grade: overall.grade,
                        severity,
                    });
                }
            }

            let maintenance = report.downtime.maintenance_events().count();
            if maintenance > 0 {
                summary.entities_with_maintenance_patterns += 1;
            }
            summary.total_maintenance_windows += maintenance;

            for alert in &report.alerts {
                *summary.alert_counts.entry(alert.severity).or_default() += 1;
            }
        }

        summary.avg_data_completeness = average(&completeness).unwrap_or(0.0);
        summary.avg_consent_success_rate = average(&consent_means).unwrap_or(0.0);
        summary.avg_health_score = average(&health_scores);
        summary.critical_performance_issues = summary
            .performance_issues
            .iter()
            .filter(|i| i.severity == AlertSeverity::Critical)
            .count();
        summary.immediate_attention = summary
            .performance_issues
            .iter()
            .filter(|i| i.severity == AlertSeverity::Critical)
            .map(|i| i.entity_id.clone())
            .collect();
        summary.monitoring_required = summary
            .performance_issues
            .iter()
            .filter(|i| i.severity == AlertSeverity::Warning)
            .map(|i| i.entity_id.clone())
            .collect();
        summary.stability_watchlist = summary
            .stability_concerns
            .iter()
            .map(|c| c.entity_id.clone())
            .collect();

        summary
    }
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(finite(values.iter().sum::<f64>() / values.len() as f64))
    }
}
