//! Health flag and the `/healthz` check.
//!
//! | Condition | Status |
//! |-----------|--------|
//! | Listener bound, shutdown not begun | 204 |
//! | Starting, or shutdown begun | 503 |
//!
//! The check is unauthenticated and has no body.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

/// Process health flag.
///
/// Healthy only while the listener is accepting and shutdown has not begun.
/// Owned by [`LifecycleManager`](super::LifecycleManager) and shared with the
/// health handler.
#[derive(Debug, Default)]
pub struct HealthState {
    healthy: AtomicBool,
}

impl HealthState {
    /// Creates an unhealthy flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Create the health check router.
///
/// Returns an Axum router with `GET /healthz`.
pub fn health_router(health: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .with_state(health)
}

async fn healthz_handler(State(health): State<Arc<HealthState>>) -> Response {
    if health.is_healthy() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}
