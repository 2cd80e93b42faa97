//! Narrative insight generation
//!
//! [`RuleBasedInsights`] derives a deterministic insight from a report.
//! [`RemoteInsightGenerator`] posts the report to an external service and
//! falls back to the rule-based output whenever that service fails.

use crate::features::TrendDirection;
use crate::maintenance::RecurringWindow;
use crate::models::MetricName;
use crate::report::EntityReport;
use crate::scoring::RiskLevel;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

pub use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    RuleBased,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTrend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionConfidence {
    Low,
    Medium,
    High,
}

/// Structured narrative for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub entity_id: String,
    pub source: InsightSource,
    pub health_trend: HealthTrend,
    pub risk_level: RiskLevel,
    pub downtime_probability: f64,
    pub confidence: PredictionConfidence,
    pub time_window: String,
    pub reasoning: String,
    pub key_patterns: Vec<String>,
    pub anomalies: Vec<String>,
    pub performance_insights: Vec<String>,
    pub stability_score: f64,
    pub recommended_actions: Vec<String>,
}

/// Produces an [`Insight`] for an analysed entity
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    fn source(&self) -> InsightSource;

    async fn generate(&self, report: &EntityReport) -> Insight;
}

/// Deterministic insight derived from features, downtime and forecast
#[derive(Debug, Clone, Default)]
pub struct RuleBasedInsights;

impl RuleBasedInsights {
    pub fn new() -> Self {
        Self
    }

    pub fn insight(&self, report: &EntityReport) -> Insight {
        let features = &report.features;
        let avg_consent = features
            .statistical
            .get(&MetricName::ConsentSuccessRate)
            .map(|s| s.mean)
            .unwrap_or(100.0);
        let avg_response = features
            .statistical
            .get(&MetricName::ResponseTime)
            .map(|s| s.mean)
            .unwrap_or(0.0);
        let consent_trend = features
            .trend
            .get(&MetricName::ConsentSuccessRate)
            .map(|t| t.direction)
            .unwrap_or(TrendDirection::Stable);
        let response_trend = features
            .trend
            .get(&MetricName::ResponseTime)
            .map(|t| t.direction)
            .unwrap_or(TrendDirection::Stable);

        let health_trend = if consent_trend == TrendDirection::Decreasing
            || response_trend == TrendDirection::Increasing
        {
            HealthTrend::Degrading
        } else if consent_trend == TrendDirection::Increasing
            && response_trend == TrendDirection::Decreasing
        {
            HealthTrend::Improving
        } else {
            HealthTrend::Stable
        };

        let risk_level = if avg_consent < 50.0 || avg_response > 10.0 {
            RiskLevel::Critical
        } else if avg_consent < 70.0 || avg_response > 5.0 {
            RiskLevel::High
        } else if avg_consent < 85.0 || avg_response > 3.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let (base, confidence, time_window) = if avg_consent < 30.0 {
            (0.9, PredictionConfidence::High, "next 30 minutes")
        } else if avg_consent < 50.0 {
            (0.75, PredictionConfidence::High, "next 1-2 hours")
        } else if avg_consent < 70.0 {
            (0.45, PredictionConfidence::Medium, "next 2-6 hours")
        } else if avg_response > 8.0 {
            (0.35, PredictionConfidence::Medium, "next 4-8 hours")
        } else {
            (0.15, PredictionConfidence::High, "next 8-24 hours")
        };
        let adjustment: f64 = match consent_trend {
            TrendDirection::Decreasing => 0.1,
            TrendDirection::Increasing => -0.1,
            TrendDirection::Stable => 0.0,
        };
        let probability = (base + adjustment).clamp(0.0, 1.0);

        let mut reasoning = vec![
            format!("Current consent success rate: {:.1}%", avg_consent),
            format!("Average response time: {:.1}s", avg_response),
            format!("Performance trend: {}", trend_word(consent_trend)),
        ];
        reasoning.push(
            if probability > 0.7 {
                "Critical performance indicators suggest imminent failure risk"
            } else if probability > 0.4 {
                "Degraded performance patterns indicate elevated risk"
            } else {
                "Performance within normal parameters with standard monitoring"
            }
            .to_string(),
        );

        let recommended_actions: Vec<String> = if probability > 0.7 {
            vec![
                "Immediately activate manual data collection procedures",
                "Send proactive notifications to all users",
                "Escalate to vendor technical team for emergency support",
            ]
        } else if probability > 0.4 {
            vec![
                "Prepare manual processing teams for potential activation",
                "Monitor performance metrics every 15 minutes",
                "Send advance notice to high-volume users",
            ]
        } else {
            vec![
                "Continue standard monitoring procedures",
                "Review performance trends in next scheduled check",
            ]
        }
        .into_iter()
        .map(String::from)
        .collect();

        Insight {
            entity_id: report.entity_id.clone(),
            source: InsightSource::RuleBased,
            health_trend,
            risk_level,
            downtime_probability: probability,
            confidence,
            time_window: time_window.to_string(),
            reasoning: reasoning.join(". "),
            key_patterns: key_patterns(report),
            anomalies: anomalies(report),
            performance_insights: vec![
                format!("Average consent success: {:.1}%", avg_consent),
                format!("Average response time: {:.1}s", avg_response),
                format!("Trend: {}", trend_title(health_trend)),
            ],
            stability_score: (avg_consent / 100.0).clamp(0.0, 1.0),
            recommended_actions,
        }
    }
}

#[async_trait]
impl InsightGenerator for RuleBasedInsights {
    fn source(&self) -> InsightSource {
        InsightSource::RuleBased
    }

    async fn generate(&self, report: &EntityReport) -> Insight {
        self.insight(report)
    }
}

fn key_patterns(report: &EntityReport) -> Vec<String> {
    let mut patterns = Vec::new();
    for (metric, pattern) in &report.features.pattern {
        if pattern.has_clear_daily_pattern {
            patterns.push(format!("Clear daily performance pattern detected in {}", metric));
        }
        patterns.push(format!("Peak {} at {}:00", metric, pattern.peak_hour));
    }
    for window in &report.downtime.recurrence.recurring_windows {
        let description = match window {
            RecurringWindow::RecurringHourly { description, .. }
            | RecurringWindow::RecurringDaily { description, .. } => description,
        };
        patterns.push(description.clone());
    }
    if patterns.is_empty() {
        patterns.push("No significant patterns detected".to_string());
    }
    patterns
}

fn anomalies(report: &EntityReport) -> Vec<String> {
    let mut notes: Vec<String> = report
        .features
        .anomaly
        .iter()
        .filter(|(_, a)| a.anomaly_rate > 0.1)
        .map(|(metric, a)| {
            format!(
                "High anomaly rate detected in {}: {:.1}%",
                metric,
                a.anomaly_rate * 100.0
            )
        })
        .collect();
    if notes.is_empty() {
        notes.push("No significant anomalies".to_string());
    }
    notes
}

fn trend_word(direction: TrendDirection) -> &'static str {
    match direction {
        TrendDirection::Increasing => "increasing",
        TrendDirection::Decreasing => "decreasing",
        TrendDirection::Stable => "stable",
    }
}

fn trend_title(trend: HealthTrend) -> &'static str {
    match trend {
        HealthTrend::Improving => "Improving",
        HealthTrend::Stable => "Stable",
        HealthTrend::Degrading => "Degrading",
    }
}

/// Settings for the external insight service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInsightConfig {
    pub endpoint: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_remote_timeout_secs() -> u64 {
    30
}

/// Posts the report to an external service, falling back to rules on failure
pub struct RemoteInsightGenerator {
    client: Client,
    endpoint: Url,
    fallback: RuleBasedInsights,
}

impl RemoteInsightGenerator {
    pub fn new(config: &RemoteInsightConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        let endpoint = Url::parse(&config.endpoint).context("Invalid insight endpoint URL")?;

        Ok(Self {
            client,
            endpoint,
            fallback: RuleBasedInsights::new(),
        })
    }

    async fn request(&self, report: &EntityReport) -> anyhow::Result<Insight> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(report)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("insight service error ({}): {}", status, body);
        }

        let mut insight: Insight = response.json().await?;
        insight.source = InsightSource::Remote;
        insight.entity_id = report.entity_id.clone();
        insight.downtime_probability = insight.downtime_probability.clamp(0.0, 1.0);
        Ok(insight)
    }
}

#[async_trait]
impl InsightGenerator for RemoteInsightGenerator {
    fn source(&self) -> InsightSource {
        InsightSource::Remote
    }

    async fn generate(&self, report: &EntityReport) -> Insight {
        match self.request(report).await {
            Ok(insight) => insight,
            Err(e) => {
                warn!(
                    entity_id = %report.entity_id,
                    error = %e,
                    "Insight service failed, using rule-based insight"
                );
                self.fallback.insight(report)
            }
        }
    }
}
