//! Metric series sources
//!
//! A [`MetricSource`] answers read-only range queries for one metric at a
//! time. Transport failures surface as [`SourceError`] and are turned into
//! [`EngineError::DataUnavailable`] by the analysis pass.

mod prometheus;

pub use prometheus::{PrometheusSource, SourceConfig, DEFAULT_ENTITY_LABEL};

use crate::error::EngineError;
use crate::models::{parse_duration_label, MetricName, MetricPoint};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub use async_trait::async_trait;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<SourceError> for EngineError {
    fn from(err: SourceError) -> Self {
        EngineError::data_unavailable(err.to_string())
    }
}

/// Time range and resolution of a query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Step label as understood by the source, e.g. `"15m"`
    pub step: String,
    /// Restrict the query to these entities
    pub entity_filter: Option<Vec<String>>,
}

impl QueryRange {
    /// Range covering `days` days up to `end`
    pub fn last_days(
        end: DateTime<Utc>,
        days: u32,
        step: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let start = Duration::try_days(days as i64)
            .and_then(|window| end.checked_sub_signed(window))
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "{} day range ending {} is out of bounds",
                    days, end
                ))
            })?;
        Ok(Self {
            start,
            end,
            step: step.into(),
            entity_filter: None,
        })
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entity_filter = Some(entities);
        self
    }

    pub fn step_duration(&self) -> Result<Duration, EngineError> {
        parse_duration_label(&self.step)
    }

    /// Label matcher for the entity filter, if any: `label="a"` for one
    /// entity, `label=~"a|b"` with each id regex-escaped otherwise
    pub fn matcher(&self, label: &str) -> Option<String> {
        let entities = self.entity_filter.as_ref().filter(|e| !e.is_empty())?;
        if let [entity] = entities.as_slice() {
            return Some(format!("{}=\"{}\"", label, quote_label_value(entity)));
        }
        let pattern = entities
            .iter()
            .map(|e| regex::escape(e))
            .collect::<Vec<_>>()
            .join("|");
        Some(format!("{}=~\"{}\"", label, quote_label_value(&pattern)))
    }
}

/// Escape a value for a double-quoted PromQL string
fn quote_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Trait for metric series backends
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch every entity's samples of `metric` over `range`
    async fn query_range(
        &self,
        metric: MetricName,
        range: &QueryRange,
    ) -> Result<Vec<MetricPoint>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_matcher_for_filter() {
        let end = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let range = QueryRange::last_days(end, 7, "15m").unwrap();
        assert_eq!(range.matcher("fip_name"), None);
        assert_eq!(range.start, end - Duration::days(7));

        let range = range.with_entities(vec!["hdfc".into(), "icici".into()]);
        assert_eq!(
            range.matcher("fip_name").as_deref(),
            Some("fip_name=~\"hdfc|icici\"")
        );
        assert_eq!(range.step_duration().unwrap(), Duration::minutes(15));
    }

    #[test]
    fn test_matcher_escapes_entity_ids() {
        let end = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let range = QueryRange::last_days(end, 7, "15m").unwrap();

        let single = range.clone().with_entities(vec![r#"bank.of "x""#.into()]);
        assert_eq!(
            single.matcher("fip_name").as_deref(),
            Some(r#"fip_name="bank.of \"x\"""#)
        );

        let many = range.with_entities(vec!["a.b".into(), "c|d".into(), "e(f)".into()]);
        assert_eq!(
            many.matcher("fip_name").as_deref(),
            Some(r#"fip_name=~"a\\.b|c\\|d|e\\(f\\)""#)
        );
    }

    #[test]
    fn test_range_before_earliest_time_rejected() {
        let end = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        assert!(QueryRange::last_days(end, 99_999_999, "15m").is_err());
    }

    #[test]
    fn test_source_error_becomes_data_unavailable() {
        let err: EngineError = SourceError::Query("bad_data".into()).into();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
        assert!(err.is_recoverable());
    }
}
