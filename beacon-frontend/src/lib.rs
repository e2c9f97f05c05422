//! Beacon agent frontend.
//!
//! The HTTPS side of the frontend: the post and poll channels agents talk
//! to, the TLS listener that carries them, and the admin server.
//!
//! # Modules
//!
//! - `admin` - Health and metrics on a private port
//! - `body` - Bounded, rate-limited body reads
//! - `error` - Protocol rejections and startup errors
//! - `handlers` - Route handlers
//! - `listener` - TLS accept loop and graceful shutdown
//! - `rate_limiter` - Upload byte-rate buckets
//! - `router` - Route table
//! - `state` - Shared handler state
//! - `tls` - Static and autocert TLS configuration

pub mod admin;
pub mod body;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod rate_limiter;
pub mod router;
pub mod state;
pub mod tls;

#[cfg(test)]
mod test_support;

pub use admin::AdminServer;
pub use error::{FrontendError, Rejection};
pub use listener::Frontend;
pub use router::build_router;
pub use state::{AppState, PeerAddr};
