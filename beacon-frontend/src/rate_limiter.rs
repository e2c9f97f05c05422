//! Upload byte-rate limiting using the GCRA algorithm.
//!
//! Post bodies pass through up to two token buckets measured in bytes: a
//! fresh per-request bucket and one server-wide bucket shared by every post.
//! Each received chunk waits until both buckets can pay for it, which slows
//! the read down to the configured rate rather than rejecting it.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use tracing::{info, warn};

use beacon_core::config::LimitsConfig;

/// Type alias for the direct (unkeyed) governor limiter.
type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// A token bucket denominated in bytes.
pub struct ByteRateLimiter {
    limiter: DirectLimiter,
    burst: NonZeroU32,
}

impl ByteRateLimiter {
    /// Create a limiter for `bytes_per_sec` with the given burst.
    ///
    /// Returns `None` when the rate is zero (unlimited). Values above
    /// `u32::MAX` saturate; a zero burst is raised to one byte.
    pub fn new(bytes_per_sec: u64, burst: u64) -> Option<Self> {
        let rate = NonZeroU32::new(saturate(bytes_per_sec))?;
        let burst = NonZeroU32::new(saturate(burst)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);
        Some(Self {
            limiter: GovernorLimiter::direct(quota),
            burst,
        })
    }

    /// Wait until `bytes` may pass.
    ///
    /// Amounts larger than the burst are paid for in burst-sized pieces.
    pub async fn consume(&self, bytes: usize) {
        let mut remaining = u64::try_from(bytes).unwrap_or(u64::MAX);
        let burst = u64::from(self.burst.get());

        while remaining > 0 {
            let piece = remaining.min(burst);
            remaining -= piece;
            let Some(piece) = NonZeroU32::new(saturate(piece)) else {
                break;
            };
            if let Err(e) = self.limiter.until_n_ready(piece).await {
                // Unreachable: pieces never exceed the burst.
                warn!(error = %e, "Upload limiter rejected a piece larger than its burst");
                break;
            }
        }
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Upload limiters built from the `limits` config section.
///
/// The server-wide bucket is created once and shared; per-request buckets
/// are created on demand so each post starts with a full burst.
#[derive(Clone)]
pub struct UploadLimits {
    per_client_rate: u64,
    burst: u64,
    global: Option<Arc<ByteRateLimiter>>,
}

impl UploadLimits {
    pub fn new(limits: &LimitsConfig) -> Self {
        let global = ByteRateLimiter::new(limits.global_upload_rate, limits.upload_burst);
        info!(
            per_client_bytes_per_sec = limits.per_client_upload_rate,
            global_bytes_per_sec = limits.global_upload_rate,
            burst_bytes = limits.upload_burst,
            "Upload rate limits configured"
        );
        Self {
            per_client_rate: limits.per_client_upload_rate,
            burst: limits.upload_burst,
            global: global.map(Arc::new),
        }
    }

    /// Limiters a single post body must pass through, outermost first.
    pub fn for_request(&self) -> Vec<Arc<ByteRateLimiter>> {
        let mut limiters = Vec::with_capacity(2);
        if let Some(per_client) = ByteRateLimiter::new(self.per_client_rate, self.burst) {
            limiters.push(Arc::new(per_client));
        }
        if let Some(global) = &self.global {
            limiters.push(Arc::clone(global));
        }
        limiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn limits(per_client: u64, global: u64, burst: u64) -> LimitsConfig {
        LimitsConfig {
            per_client_upload_rate: per_client,
            global_upload_rate: global,
            upload_burst: burst,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn test_zero_rate_is_unlimited() {
        assert!(ByteRateLimiter::new(0, 1024).is_none());
        assert!(UploadLimits::new(&limits(0, 0, 1024)).for_request().is_empty());
    }

    #[test]
    fn test_for_request_builds_requested_buckets() {
        assert_eq!(UploadLimits::new(&limits(100, 0, 10)).for_request().len(), 1);
        assert_eq!(UploadLimits::new(&limits(0, 100, 10)).for_request().len(), 1);
        assert_eq!(UploadLimits::new(&limits(100, 100, 10)).for_request().len(), 2);
    }

    #[test]
    fn test_global_bucket_is_shared() {
        let upload = UploadLimits::new(&limits(0, 100, 10));
        let a = upload.for_request();
        let b = upload.for_request();
        assert!(Arc::ptr_eq(&a[0], &b[0]));
    }

    #[test]
    fn test_per_client_bucket_is_fresh() {
        let upload = UploadLimits::new(&limits(100, 0, 10));
        let a = upload.for_request();
        let b = upload.for_request();
        assert!(!Arc::ptr_eq(&a[0], &b[0]));
    }

    #[tokio::test]
    async fn test_within_burst_passes_immediately() {
        let limiter = ByteRateLimiter::new(1_000, 4_096).unwrap();
        let started = Instant::now();
        limiter.consume(4_096).await;
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_beyond_burst_is_throttled() {
        // 100 bytes burst at 1000 B/s: the second 100 bytes need ~100ms.
        let limiter = ByteRateLimiter::new(1_000, 100).unwrap();
        let started = Instant::now();
        limiter.consume(200).await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_zero_bytes_is_noop() {
        let limiter = ByteRateLimiter::new(1, 1).unwrap();
        let started = Instant::now();
        limiter.consume(0).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
