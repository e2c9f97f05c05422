//! Bounded concurrency gate for the post channel.
//!
//! Non-urgent posts take a permit from a fixed pool before dispatch and give
//! it back when the handler is done with it, whichever way it exits. Posts
//! carrying `X-Priority: urgent` skip the pool entirely and are never
//! queued behind bulk uploads.

use std::sync::Arc;

use http::HeaderMap;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Request header carrying the priority class.
pub const PRIORITY_HEADER: &str = "x-priority";

/// Header value that bypasses admission control.
pub const URGENT: &str = "urgent";

/// Priority class of a post request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Urgent,
}

impl Priority {
    /// Classify a request from its headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match headers.get(PRIORITY_HEADER) {
            Some(value) if value.as_bytes().eq_ignore_ascii_case(URGENT.as_bytes()) => {
                Self::Urgent
            }
            _ => Self::Normal,
        }
    }
}

/// The gate was closed while waiting.
#[derive(Debug, Error)]
#[error("admission controller closed")]
pub struct AdmissionClosed;

/// Scoped admission. Releases its slot, if it holds one, on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionPermit {
    /// Whether this admission bypassed the pool.
    #[must_use]
    pub fn is_bypass(&self) -> bool {
        self.permit.is_none()
    }
}

/// Fixed-size pool of dispatch slots.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionController {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Admit a request of the given priority.
    ///
    /// Urgent requests return immediately with a bypass permit. Normal
    /// requests wait for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionClosed`] if [`close`](Self::close) was called.
    pub async fn acquire(&self, priority: Priority) -> Result<AdmissionPermit, AdmissionClosed> {
        if priority == Priority::Urgent {
            return Ok(AdmissionPermit { permit: None });
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionClosed)?;
        Ok(AdmissionPermit {
            permit: Some(permit),
        })
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured pool size.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wake every waiter with [`AdmissionClosed`].
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_priority_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(Priority::from_headers(&headers), Priority::Normal);

        headers.insert(PRIORITY_HEADER, "urgent".parse().unwrap());
        assert_eq!(Priority::from_headers(&headers), Priority::Urgent);

        headers.insert(PRIORITY_HEADER, "URGENT".parse().unwrap());
        assert_eq!(Priority::from_headers(&headers), Priority::Urgent);

        headers.insert(PRIORITY_HEADER, "low".parse().unwrap());
        assert_eq!(Priority::from_headers(&headers), Priority::Normal);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let gate = AdmissionController::new(2);
        let permit = gate.acquire(Priority::Normal).await.unwrap();
        assert!(!permit.is_bypass());
        assert_eq!(gate.available(), 1);
        drop(permit);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_urgent_bypasses_full_pool() {
        let gate = AdmissionController::new(1);
        let _held = gate.acquire(Priority::Normal).await.unwrap();
        assert_eq!(gate.available(), 0);

        let urgent = tokio::time::timeout(Duration::from_millis(50), gate.acquire(Priority::Urgent))
            .await
            .expect("urgent admission must not wait")
            .unwrap();
        assert!(urgent.is_bypass());
        assert_eq!(gate.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_waits_for_free_slot() {
        let gate = AdmissionController::new(1);
        let held = gate.acquire(Priority::Normal).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Priority::Normal).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let gate = AdmissionController::new(1);
        let _held = gate.acquire(Priority::Normal).await.unwrap();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Priority::Normal).await })
        };
        tokio::task::yield_now().await;
        gate.close();
        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_never_exceed_limit() {
        let gate = AdmissionController::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let gate = gate.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire(Priority::Normal).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
    }
}
