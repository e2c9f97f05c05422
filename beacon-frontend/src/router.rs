//! Agent-facing route table.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /control` | post channel |
//! | `POST /reader` | poll channel |
//! | `GET /server.pem` | certificate download |
//! | `GET /public/*` | static assets, when a public dir is configured |
//! | `GET /healthz` | health check |

use axum::Router;
use axum::routing::{get, post};

use beacon_core::lifecycle::health_router;

use crate::handlers::control::control_handler;
use crate::handlers::public::public_files;
use crate::handlers::reader::reader_handler;
use crate::handlers::server_pem::server_pem_handler;
use crate::state::AppState;

/// Build the router served on the TLS listener.
pub fn build_router(state: AppState) -> Router {
    let health = health_router(state.health.clone());

    let mut router = Router::new()
        .route("/control", post(control_handler))
        .route("/reader", post(reader_handler))
        .route("/server.pem", get(server_pem_handler));
    if let Some(dir) = &state.public_dir {
        router = router.nest_service("/public", public_files(dir));
    }

    router.with_state(state).merge(health)
}
