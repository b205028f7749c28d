use axum::{extract::State, response::IntoResponse, Json};
use std::sync::OnceLock;

use super::super::AppState;

pub(crate) static STARTUP_TIME: OnceLock<std::time::Instant> = OnceLock::new();

/// `GET /api/status`
pub(crate) async fn status_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /api/health`
pub(crate) async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_secs = STARTUP_TIME
        .get()
        .map(|t| t.elapsed().as_secs())
        .unwrap_or(0);

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime_secs,
        "backend": state.engine.generator_name(),
        "tokenizer": state.engine.tokenizer_name(),
    }))
}

/// `GET /api/facts`
pub(crate) async fn api_facts(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.facts_snapshot().await)
}
