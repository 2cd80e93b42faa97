//! Health analytics and risk engine for financial information providers
//!
//! This crate provides the core functionality for:
//! - Range queries against a Prometheus-compatible metric store
//! - Statistical, trend, pattern and anomaly features per entity
//! - Maintenance window and outage detection
//! - Composite health scoring and short-horizon risk forecasting
//! - Proactive alerting and narrative insights
//! - Scheduled analysis passes, health checks and observability

pub mod alerts;
pub mod error;
pub mod features;
pub mod health;
pub mod insights;
pub mod maintenance;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod scoring;
pub mod source;

pub use alerts::{Alert, AlertSeverity, AlertType};
pub use error::{EngineError, EngineResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use pipeline::{
    AnalysisEngine, AnalysisPass, AnalysisRequest, AnalysisScheduler, EngineConfig,
    SchedulerConfig,
};
pub use report::{EntityReport, FleetSummary};
pub use scoring::{RiskForecast, RiskLevel};
