//! Error types for the agent frontend.
//!
//! Two families live here. [`Rejection`] is the set of protocol responses a
//! handler can end with before it starts streaming; each one maps to exactly
//! one status code. [`FrontendError`] covers startup failures, which abort
//! the process.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode, header};
use axum::response::IntoResponse;
use thiserror::Error;

use crate::tls::TlsError;
use beacon_core::config::ConfigError;

/// 406 body on both channels.
pub const PLEASE_ENROL: &str = "Please Enrol";

/// 409 body on the poll channel.
pub const ALREADY_CONNECTED: &str = "Another Client connection exists. \
     Only a single instance of the client is allowed to connect at the same time.";

/// Early exits from the post and poll handlers.
///
/// None of these carry error detail on the wire; decrypt failures in
/// particular are a bare 403 whatever their cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// An alternate frontend is advertised (301).
    Redirect(Arc<String>),
    /// The body did not decrypt (403).
    Forbidden,
    /// The agent must enrol first (406).
    PleaseEnrol,
    /// The agent already holds a poll connection (409).
    AlreadyConnected,
    /// Body read failed, body too large, or enrolment processing failed (503).
    Unavailable,
}

impl Rejection {
    /// Status code this rejection is written with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Redirect(_) => StatusCode::MOVED_PERMANENTLY,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::PleaseEnrol => StatusCode::NOT_ACCEPTABLE,
            Self::AlreadyConnected => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Self::PleaseEnrol => PLEASE_ENROL,
            Self::AlreadyConnected => ALREADY_CONNECTED,
            Self::Redirect(_) | Self::Forbidden | Self::Unavailable => "",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(Body::from(self.body()));
        *response.status_mut() = self.status();

        if !self.body().is_empty() {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }

        if let Self::Redirect(target) = &self {
            match HeaderValue::from_str(target) {
                Ok(location) => {
                    response.headers_mut().insert(header::LOCATION, location);
                }
                Err(_) => {
                    // Config validation only admits well-formed URLs.
                    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                }
            }
        }

        response
    }
}

/// Startup failures. Any of these aborts the process.
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("admin server error: {0}")]
    Admin(String),
}
