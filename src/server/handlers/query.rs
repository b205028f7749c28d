use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::debug;

use super::super::AppState;
use crate::inference::{QueryRequest, QueryResponse};

/// HTTP status for a failure kind reported by the engine.
pub(crate) fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "invalid_request" | "empty_request" | "template_failure" => StatusCode::BAD_REQUEST,
        "malformed_tool_call" | "empty_response" => StatusCode::UNPROCESSABLE_ENTITY,
        "backend" => StatusCode::BAD_GATEWAY,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `POST /query`
///
/// The body is parsed by hand so malformed JSON gets the same failure
/// shape as every other error.
pub(crate) async fn query_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let request: QueryRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "rejecting unparsable query body");
            let resp = QueryResponse::failure_message("invalid_request", format!("invalid request: {e}"));
            return (StatusCode::BAD_REQUEST, Json(resp)).into_response();
        }
    };

    let resp = state.engine.query(&request).await;
    let status = match resp.error_kind.as_deref() {
        Some(kind) if !resp.success => status_for_kind(kind),
        _ => StatusCode::OK,
    };
    (status, Json(resp)).into_response()
}
