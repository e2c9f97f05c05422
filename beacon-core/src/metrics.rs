//! Prometheus metrics for the agent frontend.
//!
//! Registered into a `prometheus_client` registry owned by the binary and
//! exported as OpenMetrics text on the admin listener's `/metrics`.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Channel name used in labels for the post channel.
pub const CHANNEL_CONTROL: &str = "control";

/// Channel name used in labels for the poll channel.
pub const CHANNEL_READER: &str = "reader";

/// Labels for request outcome counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// "control" or "reader"
    pub channel: String,
    /// HTTP status code as string
    pub status: String,
}

/// Labels for padding frame counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChannelLabels {
    /// "control" or "reader"
    pub channel: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// FrontendMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// Metrics recorded by the post and poll handlers.
///
/// All handles are cheap clones over shared atomics.
#[derive(Clone)]
pub struct FrontendMetrics {
    /// Open poll connections.
    pub current_connections: Gauge,

    /// Completed requests by channel and status.
    pub requests_total: Family<RequestLabels, Counter>,

    /// Padding frames written, by channel.
    pub padding_frames_total: Family<ChannelLabels, Counter>,

    /// Non-urgent posts waiting for an admission permit.
    pub admission_waiting: Gauge,
}

impl FrontendMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::unregistered();

        registry.register(
            "client_comms_current_connections",
            "Number of currently connected clients",
            metrics.current_connections.clone(),
        );
        registry.register(
            "frontend_requests",
            "Agent requests completed, by channel and status",
            metrics.requests_total.clone(),
        );
        registry.register(
            "frontend_padding_frames",
            "Keep-alive padding frames written",
            metrics.padding_frames_total.clone(),
        );
        registry.register(
            "frontend_admission_waiting",
            "Post requests waiting for an admission permit",
            metrics.admission_waiting.clone(),
        );

        metrics
    }

    /// Metrics not attached to any registry. Used where nothing scrapes them.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            current_connections: Gauge::default(),
            requests_total: Family::default(),
            padding_frames_total: Family::default(),
            admission_waiting: Gauge::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Convenience Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a request outcome.
    pub fn record_request(&self, channel: &str, status: u16) {
        self.requests_total
            .get_or_create(&RequestLabels {
                channel: channel.to_string(),
                status: status.to_string(),
            })
            .inc();
    }

    /// Record one padding frame written on `channel`.
    pub fn record_padding(&self, channel: &str) {
        self.padding_frames_total
            .get_or_create(&ChannelLabels {
                channel: channel.to_string(),
            })
            .inc();
    }

    /// Increment the poll connection gauge until the guard drops.
    #[must_use]
    pub fn connection_guard(&self) -> GaugeGuard {
        GaugeGuard::new(self.current_connections.clone())
    }

    /// Increment the admission wait gauge until the guard drops.
    #[must_use]
    pub fn admission_wait_guard(&self) -> GaugeGuard {
        GaugeGuard::new(self.admission_waiting.clone())
    }
}

/// Holds a gauge incremented for its lifetime.
pub struct GaugeGuard {
    gauge: Gauge,
}

impl GaugeGuard {
    fn new(gauge: Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(registry: &Registry) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, registry)
            .expect("encoding should succeed");
        buffer
    }

    #[test]
    fn test_metrics_registration() {
        let mut registry = Registry::default();
        let metrics = FrontendMetrics::new(&mut registry);

        metrics.record_request(CHANNEL_CONTROL, 200);
        metrics.record_request(CHANNEL_READER, 409);
        metrics.record_padding(CHANNEL_CONTROL);

        let text = encode(&registry);
        assert!(text.contains("client_comms_current_connections"));
        assert!(text.contains("frontend_requests_total"));
        assert!(text.contains("frontend_padding_frames_total"));
        assert!(text.contains("frontend_admission_waiting"));
        assert!(text.contains("status=\"409\""));
        assert!(text.contains("channel=\"reader\""));
    }

    #[test]
    fn test_gauge_guard_tracks_lifetime() {
        let metrics = FrontendMetrics::unregistered();

        let a = metrics.connection_guard();
        let b = metrics.connection_guard();
        assert_eq!(metrics.current_connections.get(), 2);

        drop(a);
        assert_eq!(metrics.current_connections.get(), 1);
        drop(b);
        assert_eq!(metrics.current_connections.get(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let metrics = FrontendMetrics::unregistered();
        let clone = metrics.clone();
        let _waiting = clone.admission_wait_guard();
        assert_eq!(metrics.admission_waiting.get(), 1);
    }
}
