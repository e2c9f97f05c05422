//! TLS listener lifecycle.
//!
//! [`Frontend::bind`] loads certificates and binds sockets; any failure there
//! is fatal. [`Frontend::run`] marks the process healthy, accepts until the
//! lifecycle's shutdown token is cancelled, then:
//!
//! 1. stops accepting
//! 2. refuses posts still waiting for admission and tells every blocked poll
//!    connection to quit
//! 3. asks each connection to finish its in-flight request and close
//! 4. waits up to the shutdown grace, then force-closes what remains
//!
//! The health flag has already flipped by the time step 1 runs, since
//! [`LifecycleManager::begin_shutdown`] clears it before cancelling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use beacon_core::config::{Config, ListenConfig, TlsConfig};
use beacon_core::lifecycle::ConnectionGuard;
use beacon_core::{
    AdmissionController, DrainResult, FrontendMetrics, LifecycleManager, MessagePipeline,
    NotificationRegistry,
};

use crate::error::FrontendError;
use crate::router::build_router;
use crate::state::{AppState, PeerAddr};
use crate::tls;

/// Pause after a failed accept so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TCP keepalive idle time on agent sockets.
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// A bound, not yet serving, agent frontend.
pub struct Frontend {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    challenge: Option<(TcpListener, Router)>,
    listen: ListenConfig,
    lifecycle: Arc<LifecycleManager>,
    registry: Arc<NotificationRegistry>,
    admission: AdmissionController,
}

impl Frontend {
    /// Load certificates, build the router and bind every socket.
    ///
    /// In autocert mode the TLS listener binds 443 whatever `bind_port`
    /// says, and a plaintext challenge listener is bound as well.
    ///
    /// # Errors
    ///
    /// Returns [`FrontendError::Tls`] for unusable certificates and
    /// [`FrontendError::Bind`] when a socket cannot be bound.
    pub async fn bind(
        config: &Config,
        pipeline: Arc<dyn MessagePipeline>,
        lifecycle: Arc<LifecycleManager>,
        registry: Arc<NotificationRegistry>,
        metrics: FrontendMetrics,
    ) -> Result<Self, FrontendError> {
        let mut state = AppState::new(
            config,
            pipeline,
            Arc::clone(&registry),
            metrics,
            lifecycle.health(),
            lifecycle.shutdown_token(),
        );

        let (server_config, challenge) = match &config.tls {
            TlsConfig::Static(static_tls) => {
                let server_config = tls::static_server_config(static_tls)?;
                state = state.with_server_pem(tls::read_server_pem(&static_tls.certificate)?);
                (server_config, None)
            }
            TlsConfig::Autocert(autocert) => {
                let challenge_addr =
                    SocketAddr::new(config.listen.bind_address, autocert.challenge_port);
                let challenge_listener = bind(challenge_addr).await?;
                info!(addr = %challenge_addr, "ACME challenge listener bound");
                (
                    tls::autocert_server_config(autocert)?,
                    Some((
                        challenge_listener,
                        tls::challenge_router(autocert.cache_dir.clone()),
                    )),
                )
            }
        };

        let listener = bind(config.tls_listen_addr()).await?;
        let admission = state.admission.clone();

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(server_config),
            router: build_router(state),
            challenge,
            listen: config.listen.clone(),
            lifecycle,
            registry,
            admission,
        })
    }

    /// Address the TLS listener is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown, then drain.
    pub async fn run(self) -> DrainResult {
        let shutdown = self.lifecycle.shutdown_token();
        let force_close = CancellationToken::new();
        let tracker = TaskTracker::new();

        if let Some((listener, router)) = self.challenge {
            tracker.spawn(serve_plaintext(listener, router, shutdown.clone()));
        }

        let settings = ConnectionSettings::from(&self.listen);
        self.lifecycle.mark_serving();
        match self.listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Frontend listening"),
            Err(e) => warn!(error = %e, "Frontend listening on unknown address"),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let Some(guard) = self.lifecycle.track_connection() else {
                            debug!(peer = %peer, "Rejected connection: shutting down");
                            continue;
                        };
                        if let Err(e) = configure_tcp_stream(&stream) {
                            debug!(peer = %peer, error = %e, "Failed to configure socket");
                        }
                        tracker.spawn(serve_connection(
                            stream,
                            peer,
                            self.acceptor.clone(),
                            self.router.clone(),
                            settings,
                            shutdown.clone(),
                            force_close.clone(),
                            guard,
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                () = shutdown.cancelled() => break,
            }
        }

        drop(self.listener);
        self.admission.close();
        let told = self.registry.notify_all_quit();
        info!(
            poll_connections = told,
            active_connections = self.lifecycle.active_connection_count(),
            grace_secs = self.lifecycle.shutdown_grace().as_secs(),
            "Stopped accepting, draining connections"
        );

        tracker.close();
        let result = self.lifecycle.drain_connections().await;
        if let DrainResult::Timeout { remaining } = &result {
            warn!(remaining = remaining, "Force-closing connections after grace period");
            force_close.cancel();
        }
        tracker.wait().await;

        self.lifecycle.mark_stopped();
        result
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, FrontendError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| FrontendError::Bind { addr, source })
}

/// Per-connection timeouts.
#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    /// Handshake and header read bound.
    idle_timeout: Duration,
    /// Whole-connection bound.
    write_timeout: Duration,
}

impl From<&ListenConfig> for ConnectionSettings {
    fn from(listen: &ListenConfig) -> Self {
        Self {
            idle_timeout: listen.idle_timeout,
            write_timeout: listen.write_timeout,
        }
    }
}

fn configure_tcp_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let socket = socket2::SockRef::from(stream);
    socket.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(TCP_KEEPALIVE))
}

#[allow(clippy::too_many_arguments)]
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
    force_close: CancellationToken,
    _guard: ConnectionGuard,
) {
    let tls = match tokio::time::timeout(settings.idle_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "TLS handshake timed out");
            return;
        }
    };

    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(PeerAddr(peer));
        router.clone().oneshot(request.map(Body::new))
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(settings.idle_timeout);
    let conn = builder.serve_connection(TokioIo::new(tls), service);
    tokio::pin!(conn);

    let lifetime = tokio::time::sleep(settings.write_timeout);
    tokio::pin!(lifetime);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "Connection error");
            }
            return;
        }
        () = &mut lifetime => {
            debug!(peer = %peer, "Connection exceeded write timeout");
            return;
        }
        () = shutdown.cancelled() => {}
    }

    conn.as_mut().graceful_shutdown();
    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "Connection error during shutdown");
            }
        }
        () = &mut lifetime => {}
        () = force_close.cancelled() => {
            debug!(peer = %peer, "Connection force-closed");
        }
    }
}

/// Serve a plaintext router until shutdown.
async fn serve_plaintext(listener: TcpListener, router: Router, shutdown: CancellationToken) {
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        error!(error = %e, "Challenge listener failed");
    }
}
