//! Prometheus-compatible `query_range` client

use super::*;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Label carrying the provider id on every exported series
pub const DEFAULT_ENTITY_LABEL: &str = "fip_name";

const UNKNOWN_ENTITY: &str = "unknown";

/// Connection settings for the metric source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    #[serde(default = "default_entity_label")]
    pub entity_label: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_entity_label() -> String {
    DEFAULT_ENTITY_LABEL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8428".to_string(),
            entity_label: default_entity_label(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<RangeResult>,
}

#[derive(Debug, Deserialize)]
struct RangeResult {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Client for a Prometheus or VictoriaMetrics HTTP API
pub struct PrometheusSource {
    client: Client,
    base_url: Url,
    entity_label: String,
}

impl PrometheusSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        let mut base_url = Url::parse(&config.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            entity_label: config.entity_label.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn decode(&self, metric: MetricName, response: QueryResponse) -> Result<Vec<MetricPoint>, SourceError> {
        if response.status != "success" {
            return Err(SourceError::Query(format!(
                "{}: {}",
                response.error_type.unwrap_or_else(|| response.status.clone()),
                response.error.unwrap_or_default()
            )));
        }
        let Some(data) = response.data else {
            return Ok(Vec::new());
        };
        if data.result_type != "matrix" {
            return Err(SourceError::Query(format!(
                "expected matrix result, got {}",
                data.result_type
            )));
        }

        let mut points = Vec::new();
        for series in data.result {
            let entity_id = series
                .metric
                .get(&self.entity_label)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_ENTITY.to_string());
            for (ts, raw) in series.values {
                let Some(timestamp) = decode_timestamp(ts) else {
                    continue;
                };
                points.push(MetricPoint {
                    timestamp,
                    entity_id: entity_id.clone(),
                    metric,
                    value: decode_value(&raw),
                });
            }
        }
        Ok(points)
    }
}

#[async_trait]
impl MetricSource for PrometheusSource {
    async fn query_range(
        &self,
        metric: MetricName,
        range: &QueryRange,
    ) -> Result<Vec<MetricPoint>, SourceError> {
        let url = self.base_url.join("api/v1/query_range")?;
        let matcher = range.matcher(&self.entity_label);
        let query = metric.query(matcher.as_deref());
        let start = range.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = range.end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let response = self
            .client
            .get(url)
            .query(&[
                ("query", query.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", range.step.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        let body: QueryResponse = response.json().await?;
        let points = self.decode(metric, body)?;

        debug!(
            metric = %metric,
            query = %query,
            points = points.len(),
            "Range query completed"
        );

        Ok(points)
    }
}

fn decode_timestamp(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() {
        return None;
    }
    let secs = ts.trunc() as i64;
    let nanos = ((ts - ts.trunc()) * 1e9).round() as u32;
    DateTime::from_timestamp(secs, nanos.min(999_999_999))
}

/// `"NaN"`, infinities and unparsable strings are missing values
fn decode_value(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
