//! Per-agent wake-up registry for poll connections.
//!
//! Each admitted poll connection owns exactly one slot keyed by the agent's
//! identifier. A slot is a single-capacity channel: the dispatch pipeline
//! signals it when work is queued for that agent, the poll handler signals
//! it when its own deadline expires, and shutdown signals every slot at once
//! with [`Notification::Quit`].
//!
//! ```text
//! register("C.1") ──► Slot { id, tx } ──► ClientListener { rx }
//!                         ▲
//!   notify("C.1") ────────┤  try_send: a full slot already has a wake pending
//!   notify_all_quit() ────┘
//! ```
//!
//! Registration is a single check-and-insert on the map entry, so two
//! concurrent poll requests for one agent can never both be admitted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Signal delivered to a waiting poll connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Work may be queued; drain once and close.
    Work,
    /// Close without draining.
    Quit,
}

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The agent already holds a poll connection.
    #[error("client {source_id} already has an active poll connection")]
    AlreadyConnected {
        /// Agent identifier
        source_id: String,
    },
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<Notification>,
}

/// Concurrent map from agent identifier to its wake slot.
#[derive(Default)]
pub struct NotificationRegistry {
    slots: DashMap<String, Slot>,
    next_id: AtomicU64,
}

impl NotificationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a poll connection for `source`.
    ///
    /// The returned listener removes the slot when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyConnected`] if `source` already has a
    /// slot. No slot is created in that case.
    pub fn register(self: &Arc<Self>, source: &str) -> Result<ClientListener, RegistryError> {
        match self.slots.entry(source.to_owned()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyConnected {
                source_id: source.to_owned(),
            }),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::channel(1);
                vacant.insert(Slot { id, tx: tx.clone() });
                debug!(source = %source, "Poll connection registered");
                Ok(ClientListener {
                    registry: Arc::clone(self),
                    source: source.to_owned(),
                    id,
                    tx,
                    rx,
                })
            }
        }
    }

    /// Signal `source` that work may be queued.
    ///
    /// Returns `false` when the agent has no poll connection.
    pub fn notify(&self, source: &str) -> bool {
        match self.slots.get(source) {
            Some(slot) => deliver(&slot.tx, Notification::Work),
            None => false,
        }
    }

    /// Send [`Notification::Quit`] to every registered poll connection.
    ///
    /// Returns the number of slots signalled.
    pub fn notify_all_quit(&self) -> usize {
        let mut signalled = 0;
        for slot in self.slots.iter() {
            if deliver(&slot.tx, Notification::Quit) {
                signalled += 1;
            }
        }
        signalled
    }

    /// Returns true if `source` currently holds a poll connection.
    #[must_use]
    pub fn is_connected(&self, source: &str) -> bool {
        self.slots.contains_key(source)
    }

    /// Number of registered poll connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A full slot already holds an undelivered wake, which the listener will
/// act on; that counts as delivered.
fn deliver(tx: &mpsc::Sender<Notification>, notification: Notification) -> bool {
    match tx.try_send(notification) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Receiving end of a slot, owned by one poll connection.
///
/// Dropping it deregisters the agent.
pub struct ClientListener {
    registry: Arc<NotificationRegistry>,
    source: String,
    id: u64,
    tx: mpsc::Sender<Notification>,
    rx: mpsc::Receiver<Notification>,
}

impl ClientListener {
    /// Agent identifier this listener is registered under.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Wait for the next notification.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Notification {
        // The listener holds a sender, so the channel never closes under us.
        self.rx.recv().await.unwrap_or(Notification::Quit)
    }

    /// Signal this listener's own slot.
    pub fn notify_self(&self, notification: Notification) {
        deliver(&self.tx, notification);
    }
}

impl Drop for ClientListener {
    fn drop(&mut self) {
        let id = self.id;
        self.registry
            .slots
            .remove_if(&self.source, |_, slot| slot.id == id);
        debug!(source = %self.source, "Poll connection deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = Arc::new(NotificationRegistry::new());
        let listener = registry.register("C.1").unwrap();
        assert_eq!(listener.source(), "C.1");
        assert!(registry.is_connected("C.1"));
        assert_eq!(registry.len(), 1);

        drop(listener);
        assert!(!registry.is_connected("C.1"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = Arc::new(NotificationRegistry::new());
        let _first = registry.register("C.1").unwrap();

        let err = registry.register("C.1").err().unwrap();
        assert_eq!(
            err,
            RegistryError::AlreadyConnected {
                source_id: "C.1".to_string()
            }
        );
        // The rejected attempt must not disturb the existing slot.
        assert!(registry.is_connected("C.1"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_reregister_after_drop() {
        let registry = Arc::new(NotificationRegistry::new());
        drop(registry.register("C.1").unwrap());
        assert!(registry.register("C.1").is_ok());
    }

    #[tokio::test]
    async fn test_notify_wakes_listener() {
        let registry = Arc::new(NotificationRegistry::new());
        let mut listener = registry.register("C.1").unwrap();

        assert!(registry.notify("C.1"));
        assert_eq!(listener.recv().await, Notification::Work);
    }

    #[tokio::test]
    async fn test_notify_unknown_client() {
        let registry = Arc::new(NotificationRegistry::new());
        assert!(!registry.notify("C.missing"));
    }

    #[tokio::test]
    async fn test_notify_coalesces_when_slot_full() {
        let registry = Arc::new(NotificationRegistry::new());
        let mut listener = registry.register("C.1").unwrap();

        assert!(registry.notify("C.1"));
        assert!(registry.notify("C.1"));
        assert!(registry.notify("C.1"));

        assert_eq!(listener.recv().await, Notification::Work);
        let second = tokio::time::timeout(Duration::from_millis(20), listener.recv()).await;
        assert!(second.is_err(), "extra wakes should coalesce into one");
    }

    #[tokio::test]
    async fn test_notify_self() {
        let registry = Arc::new(NotificationRegistry::new());
        let mut listener = registry.register("C.1").unwrap();
        listener.notify_self(Notification::Work);
        assert_eq!(listener.recv().await, Notification::Work);
    }

    #[tokio::test]
    async fn test_notify_all_quit() {
        let registry = Arc::new(NotificationRegistry::new());
        let mut a = registry.register("C.a").unwrap();
        let mut b = registry.register("C.b").unwrap();

        assert_eq!(registry.notify_all_quit(), 2);
        assert_eq!(a.recv().await, Notification::Quit);
        assert_eq!(b.recv().await, Notification::Quit);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_admits_exactly_one() {
        let registry = Arc::new(NotificationRegistry::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                registry.register("C.same")
            }));
        }

        let mut admitted = Vec::new();
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(listener) => admitted.push(listener),
                Err(RegistryError::AlreadyConnected { .. }) => rejected += 1,
            }
        }

        assert_eq!(admitted.len(), 1);
        assert_eq!(rejected, 31);
        assert_eq!(registry.len(), 1);
    }
}
