use crate::error::AppError;
use axum::{
    extract::State,
    http::header,
    response::{
        IntoResponse,
        Response,
    },
    routing::get,
    Json,
    Router,
};
use simplemdm_exporter_gatherer::{
    metrics::CONTENT_TYPE,
    CycleReport,
    MetricRegistry,
};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MetricRegistry>,
    pub reports: watch::Receiver<Option<CycleReport>>,
}

pub fn create_router(registry: Arc<MetricRegistry>, reports: watch::Receiver<Option<CycleReport>>) -> Router {
    let state = AppState { registry, reports };

    Router::new()
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// The current snapshot in the Prometheus text format. Never reflects collection failures.
async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    let body = state.registry.snapshot().encode()?;
    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response())
}

/// The report of the last finished cycle, `null` before the first one.
async fn status(State(state): State<AppState>) -> Json<Option<CycleReport>> {
    Json(state.reports.borrow().clone())
}

async fn healthz() -> &'static str {
    "OK"
}
