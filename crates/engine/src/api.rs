//! HTTP API for health checks, Prometheus metrics and analysis results

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use engine_lib::{
    alerts::{self, Alert, AlertSeverity},
    health::{ComponentStatus, HealthRegistry},
    observability::EngineMetrics,
    pipeline::ResultCache,
    report::FleetSummary,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: EngineMetrics,
    pub cache: Arc<ResultCache>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: EngineMetrics,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            cache,
        }
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Partial results are still served
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Latest report per entity
async fn reports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.cache.latest())
}

async fn entity_report(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Response {
    match state.cache.latest_for(&entity_id) {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No report for entity '{}'", entity_id) })),
        )
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub severity: Option<AlertSeverity>,
    pub entity: Option<String>,
}

/// Deduplicated, prioritised alerts across the latest reports
async fn fleet_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> impl IntoResponse {
    let collected: Vec<Alert> = state
        .cache
        .latest()
        .into_iter()
        .filter(|r| query.entity.as_ref().map_or(true, |e| &r.entity_id == e))
        .flat_map(|r| r.alerts)
        .filter(|a| query.severity.map_or(true, |s| a.severity == s))
        .collect();

    let mut alerts = alerts::deduplicate(collected);
    alerts::prioritize(&mut alerts);
    Json(alerts)
}

async fn summary(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(FleetSummary::from_reports(&state.cache.latest(), Utc::now()))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/reports", get(reports))
        .route("/api/v1/reports/:entity_id", get(entity_report))
        .route("/api/v1/alerts", get(fleet_alerts))
        .route("/api/v1/summary", get(summary))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
