//! Error kinds surfaced by the analytics engine

use thiserror::Error;

/// Errors produced while analysing provider metrics
///
/// `DataUnavailable` and `ComputationDegenerate` are recoverable: callers
/// substitute defaults and keep going. `Configuration` is raised by
/// constructors before any analysis runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A required series was missing or empty
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// A statistic was undefined for the given input
    #[error("degenerate computation: {0}")]
    ComputationDegenerate(String),

    /// Unknown metric names, malformed thresholds or weights
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn data_unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::ComputationDegenerate(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns true if the caller can substitute defaults and continue
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Configuration(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(EngineError::data_unavailable("no status series").is_recoverable());
        assert!(EngineError::degenerate("zero variance").is_recoverable());
        assert!(!EngineError::configuration("weights sum to 0.9").is_recoverable());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = EngineError::configuration("unknown metric 'latency'");
        assert_eq!(err.to_string(), "configuration error: unknown metric 'latency'");
    }
}
