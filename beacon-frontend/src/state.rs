//! Shared handler state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderName;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use beacon_core::config::{Config, LimitsConfig, ListenConfig, TimingConfig};
use beacon_core::{
    AdmissionController, FrontendMetrics, FrontendRedirector, HealthState, MessagePipeline,
    NotificationRegistry,
};

use crate::rate_limiter::UploadLimits;

/// Socket peer address, inserted as a request extension by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// State cloned into every request.
///
/// Everything here is either a cheap handle or behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<dyn MessagePipeline>,
    pub registry: Arc<NotificationRegistry>,
    pub admission: AdmissionController,
    pub redirector: Arc<FrontendRedirector>,
    pub upload_limits: UploadLimits,
    pub limits: LimitsConfig,
    pub timing: TimingConfig,
    pub listen: ListenConfig,
    /// Trusted header carrying the real client address on the post channel.
    pub proxy_header: Option<HeaderName>,
    pub metrics: FrontendMetrics,
    pub health: Arc<HealthState>,
    /// Cancelled when shutdown begins.
    pub shutdown: CancellationToken,
    /// Body of `/server.pem`.
    pub server_pem: Option<Bytes>,
    /// Directory served under `/public`.
    pub public_dir: Option<PathBuf>,
}

impl AppState {
    /// Build handler state from a validated config.
    ///
    /// `proxy_header` has already passed validation, so a malformed name is
    /// dropped rather than reported.
    pub fn new(
        config: &Config,
        pipeline: Arc<dyn MessagePipeline>,
        registry: Arc<NotificationRegistry>,
        metrics: FrontendMetrics,
        health: Arc<HealthState>,
        shutdown: CancellationToken,
    ) -> Self {
        let redirector = Arc::new(FrontendRedirector::new());
        if let Some(url) = &config.redirect_url {
            redirector.advertise(url.clone());
        }

        Self {
            pipeline,
            registry,
            admission: AdmissionController::new(config.limits.concurrency),
            redirector,
            upload_limits: UploadLimits::new(&config.limits),
            limits: config.limits.clone(),
            timing: config.timing.clone(),
            listen: config.listen.clone(),
            proxy_header: config
                .proxy_header
                .as_deref()
                .and_then(|name| HeaderName::try_from(name).ok()),
            metrics,
            health,
            shutdown,
            server_pem: None,
            public_dir: config.public_dir.clone(),
        }
    }

    #[must_use]
    pub fn with_server_pem(mut self, pem: Bytes) -> Self {
        self.server_pem = Some(pem);
        self
    }
}
