//! HTTP front end for the inference engine.
//!
//! - `POST /query`: run one conversation through the engine
//! - `GET  /api/status`: returns `{ "status": "ok" }`
//! - `GET  /api/health`: version, uptime and backend names
//! - `GET  /api/facts`: the current system facts snapshot

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::inference::InferenceEngine;

/// Handle returned by [`start_server`].
pub struct Server {
    /// Server task handle.
    pub handle: JoinHandle<()>,
    /// The address the server is actually listening on.
    pub addr: SocketAddr,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: Arc<InferenceEngine>,
}

pub fn router(engine: Arc<InferenceEngine>) -> Router {
    let state = AppState { engine };

    let api_router = Router::new()
        .route("/status", get(handlers::health::status_handler))
        .route("/health", get(handlers::health::api_health))
        .route("/facts", get(handlers::health::api_facts));

    Router::new()
        .route("/query", post(handlers::query::query_handler))
        .nest("/api", api_router)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve the engine. Port 0 picks a free port; the bound
/// address is reported in [`Server::addr`].
pub async fn start_server(addr: SocketAddr, engine: Arc<InferenceEngine>) -> std::io::Result<Server> {
    let _ = handlers::health::STARTUP_TIME.set(std::time::Instant::now());

    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("query server error: {e}");
        }
    });

    info!(%bound_addr, "query server started");

    Ok(Server {
        handle,
        addr: bound_addr,
    })
}
