//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{routing::get, Router};
use kube::Client;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{Error, Result};

use super::handlers;

pub const DEFAULT_API_PORT: u16 = 8080;

/// State shared by the handlers
pub struct ApiState {
    pub client: Client,
    pub is_leader: Arc<AtomicBool>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/loadbalancers", get(handlers::list_load_balancers))
        .route(
            "/api/v1/loadbalancers/{namespace}/{name}",
            get(handlers::get_load_balancer),
        );

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(handlers::metrics));

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the REST API server
pub async fn run_server(state: Arc<ApiState>, port: u16) -> Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("REST API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
