//! Admin server: health and metrics on a private port.
//!
//! # Endpoints
//!
//! - `GET /healthz` - same flag as the agent-facing health check
//! - `GET /metrics` - OpenMetrics text from the process registry
//!
//! Bound separately from the agent listener so scrapers never need TLS or
//! reach the agent port.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use beacon_core::HealthState;
use beacon_core::lifecycle::health_router;

use crate::error::FrontendError;

const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone)]
struct AdminState {
    registry: Arc<Registry>,
}

pub struct AdminServer {
    addr: SocketAddr,
    health: Arc<HealthState>,
    registry: Arc<Registry>,
}

impl AdminServer {
    pub fn new(addr: SocketAddr, health: Arc<HealthState>, registry: Arc<Registry>) -> Self {
        Self {
            addr,
            health,
            registry,
        }
    }

    pub fn router(&self) -> Router {
        let metrics = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(AdminState {
                registry: Arc::clone(&self.registry),
            });

        health_router(Arc::clone(&self.health)).merge(metrics)
    }

    /// Bind and serve until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`FrontendError::Bind`] if the port is taken and
    /// [`FrontendError::Admin`] if serving fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), FrontendError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| FrontendError::Bind {
                addr: self.addr,
                source,
            })?;

        info!(addr = %self.addr, "Admin server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin server shutting down");
            })
            .await
            .map_err(|e| FrontendError::Admin(e.to_string()))
    }
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let mut buffer = String::new();

    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.registry) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
        buffer,
    )
        .into_response()
}
