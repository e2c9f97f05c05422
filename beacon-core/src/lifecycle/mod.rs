//! Listener lifecycle management for the agent frontend.
//!
//! This module provides:
//! - Lifecycle state tracking
//! - The process health flag polled by load balancers
//! - Graceful shutdown with connection draining
//!
//! ## Lifecycle States
//!
//! ```text
//! Starting → Serving → ShuttingDown → Stopped
//! ```
//!
//! - **Starting**: Binding the listener, loading certificates
//! - **Serving**: Listener bound, accepting agent connections
//! - **ShuttingDown**: Health flag cleared, draining in-flight connections
//! - **Stopped**: Shutdown complete
//!
//! The health flag is cleared at the very start of `begin_shutdown`, before
//! the shutdown token is cancelled, so health checks fail while the listener is
//! still accepting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod health;

pub use health::{HealthState, health_router};

/// Interval between drain progress checks.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between drain progress log lines.
const DRAIN_LOG_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Listener not yet bound
    Starting,
    /// Accepting agent connections
    Serving,
    /// Draining, no new connections
    ShuttingDown,
    /// Shutdown complete
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Serving => write!(f, "serving"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ============================================================================
// Lifecycle Manager
// ============================================================================

/// Coordinates startup, health, and shutdown of the frontend listener.
///
/// Owns the shared shutdown [`CancellationToken`]. Every blocking wait in the
/// request handlers selects on a clone of it, so cancelling it is the single
/// broadcast that tells the whole process to wind down.
///
/// # Thread Safety
///
/// All state is atomic or lock-free; the manager is shared as
/// `Arc<LifecycleManager>` between the listener, handlers and signal tasks.
pub struct LifecycleManager {
    /// Current lifecycle state
    state: ArcSwap<LifecycleState>,

    /// When the manager was created
    started_at: Instant,

    /// Shutdown cancellation token
    shutdown_token: CancellationToken,

    /// Set once by the first `begin_shutdown` call
    shutdown_started: AtomicBool,

    /// Open agent connections (for draining)
    active_connections: AtomicUsize,

    /// Health flag served on `/healthz`
    health: Arc<HealthState>,

    /// Upper bound on `drain_connections`
    shutdown_grace: Duration,
}

impl LifecycleManager {
    /// Creates a new lifecycle manager in the `Starting` state.
    ///
    /// The health flag starts unhealthy.
    #[must_use]
    pub fn new(shutdown_grace: Duration) -> Self {
        Self {
            state: ArcSwap::new(Arc::new(LifecycleState::Starting)),
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
            shutdown_started: AtomicBool::new(false),
            active_connections: AtomicUsize::new(0),
            health: Arc::new(HealthState::new()),
            shutdown_grace,
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns true if the listener is accepting connections.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        matches!(self.state(), LifecycleState::Serving)
    }

    /// Returns true if the service is shutting down or stopped.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Returns the shared health flag.
    #[must_use]
    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    /// Returns a clone of the shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Transition to `Serving` and mark the process healthy.
    ///
    /// Called once the listener is bound. A no-op once shutdown has begun,
    /// so a late bind can never turn the health flag back on.
    pub fn mark_serving(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.state.store(Arc::new(LifecycleState::Serving));
        self.health.mark_healthy();
        info!(
            startup_duration_ms = self.started_at.elapsed().as_millis(),
            "Frontend serving"
        );
    }

    /// Begin graceful shutdown.
    ///
    /// In order:
    /// 1. Marks the process unhealthy
    /// 2. Sets state to `ShuttingDown`
    /// 3. Cancels the shutdown token
    ///
    /// Only the first call has any effect.
    pub fn begin_shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.health.mark_unhealthy();
        self.state.store(Arc::new(LifecycleState::ShuttingDown));
        self.shutdown_token.cancel();
        info!(
            active_connections = self.active_connections.load(Ordering::SeqCst),
            "Shutdown initiated"
        );
    }

    /// Track an open agent connection (returns RAII guard).
    ///
    /// Returns `None` once shutdown has begun.
    #[must_use]
    pub fn track_connection(self: &Arc<Self>) -> Option<ConnectionGuard> {
        if self.is_shutting_down() {
            return None;
        }
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        Some(ConnectionGuard {
            manager: Arc::clone(self),
        })
    }

    /// Returns the number of open agent connections.
    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Returns the configured drain bound.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Wait for open connections to finish, bounded by the shutdown grace.
    ///
    /// Polls every 100ms. Returns `DrainResult::Complete` when the count
    /// reaches zero, `DrainResult::Timeout` when the grace period runs out.
    pub async fn drain_connections(&self) -> DrainResult {
        let deadline = Instant::now() + self.shutdown_grace;
        let mut last_log = Instant::now();

        loop {
            let active = self.active_connections.load(Ordering::SeqCst);

            if active == 0 {
                return DrainResult::Complete;
            }

            if Instant::now() >= deadline {
                warn!(
                    active_connections = active,
                    "Drain grace exceeded, forcing close"
                );
                return DrainResult::Timeout { remaining: active };
            }

            if last_log.elapsed() >= DRAIN_LOG_INTERVAL {
                info!(active_connections = active, "Draining connections...");
                last_log = Instant::now();
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Mark as stopped.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
        info!(
            uptime_secs = self.started_at.elapsed().as_secs(),
            "Frontend stopped"
        );
    }
}

// ============================================================================
// Connection Guard
// ============================================================================

/// RAII guard for connection tracking.
///
/// Dropping the guard decrements the open-connection counter, including
/// when the connection task panics.
pub struct ConnectionGuard {
    manager: Arc<LifecycleManager>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager
            .active_connections
            .fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Drain Result
// ============================================================================

/// Result of draining connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// All connections closed before the grace period ran out
    Complete,
    /// Grace period ran out with connections still open
    Timeout {
        /// Number of connections still open
        remaining: usize,
    },
}

// ============================================================================
// Tests
// ============================================================================
