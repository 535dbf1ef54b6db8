//! WebSocket subscription management.
//!
//! Routes `eth_subscription` notifications to their subscriber. Each
//! subscriber gets a bounded buffer; a subscriber that falls a full buffer
//! behind is errored and removed instead of having notifications dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ethstream_core::error::TransportError;
use ethstream_core::subscription::SubscriptionId;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// Routing state for a single subscription.
struct SubscriptionEntry {
    /// The subscription type (e.g. `"newHeads"`).
    kind: String,
    /// Bounded channel to the subscriber.
    sender: mpsc::Sender<Value>,
    /// Error side channel, fired at most once.
    error: oneshot::Sender<TransportError>,
}

/// Receiving halves handed to a new subscriber.
pub struct Registration {
    pub items: mpsc::Receiver<Value>,
    pub error: oneshot::Receiver<TransportError>,
}

/// What happened to a dispatched notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// No live subscription with that ID (already released upstream).
    Unknown,
    /// The subscriber's buffer was full; it has been errored and removed.
    Overflowed,
    /// The subscriber went away; the entry has been removed.
    Gone,
}

/// Tracks active subscriptions on one WebSocket connection.
#[derive(Clone)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionId, SubscriptionEntry>>>,
    capacity: usize,
}

impl SubscriptionManager {
    /// `capacity` is the per-subscription notification buffer.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscription.
    pub fn register(&self, id: SubscriptionId, kind: String) -> Registration {
        let (sender, items) = mpsc::channel(self.capacity);
        let (error_tx, error) = oneshot::channel();
        self.entries.lock().unwrap().insert(
            id,
            SubscriptionEntry {
                kind,
                sender,
                error: error_tx,
            },
        );
        Registration { items, error }
    }

    /// Forward an incoming notification to the correct subscription.
    pub fn dispatch(&self, id: &SubscriptionId, message: Value) -> Dispatch {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(id) else {
            return Dispatch::Unknown;
        };
        match entry.sender.try_send(message) {
            Ok(()) => Dispatch::Delivered,
            Err(TrySendError::Full(_)) => {
                if let Some(entry) = entries.remove(id) {
                    tracing::warn!(subscription = %id, kind = %entry.kind, capacity = self.capacity, "subscriber too slow, dropping subscription");
                    let _ = entry.error.send(TransportError::WebSocket(format!(
                        "subscriber too slow: {} buffered notifications not consumed",
                        self.capacity
                    )));
                }
                Dispatch::Overflowed
            }
            Err(TrySendError::Closed(_)) => {
                entries.remove(id);
                Dispatch::Gone
            }
        }
    }

    /// Remove a subscription (e.g. before `eth_unsubscribe`).
    pub fn remove(&self, id: &SubscriptionId) -> bool {
        self.entries.lock().unwrap().remove(id).is_some()
    }

    /// Error and remove every subscription. Used when the connection is lost.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = self.entries.lock().unwrap().drain().collect();
        for (id, entry) in drained {
            tracing::debug!(subscription = %id, kind = %entry.kind, "failing subscription");
            let _ = entry
                .error
                .send(TransportError::WebSocket(reason.to_string()));
        }
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SubscriptionId {
        SubscriptionId(s.into())
    }

    #[test]
    fn register_and_dispatch() {
        let mgr = SubscriptionManager::new(4);
        let mut reg = mgr.register(id("0xdeadbeef"), "newHeads".into());

        let outcome = mgr.dispatch(&id("0xdeadbeef"), serde_json::json!({"number": "0x1"}));
        assert_eq!(outcome, Dispatch::Delivered);

        let msg = reg.items.try_recv().unwrap();
        assert_eq!(msg["number"], "0x1");
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mgr = SubscriptionManager::new(4);
        assert_eq!(mgr.dispatch(&id("0x9"), Value::Null), Dispatch::Unknown);
    }

    #[test]
    fn full_buffer_errors_the_subscription() {
        let mgr = SubscriptionManager::new(2);
        let mut reg = mgr.register(id("0x1"), "newHeads".into());

        assert_eq!(mgr.dispatch(&id("0x1"), 1.into()), Dispatch::Delivered);
        assert_eq!(mgr.dispatch(&id("0x1"), 2.into()), Dispatch::Delivered);
        assert_eq!(mgr.dispatch(&id("0x1"), 3.into()), Dispatch::Overflowed);
        assert!(mgr.is_empty());

        let err = reg.error.try_recv().unwrap();
        assert!(err.to_string().contains("too slow"));
        // Everything buffered before the overflow is still readable.
        assert_eq!(reg.items.try_recv().unwrap(), 1);
        assert_eq!(reg.items.try_recv().unwrap(), 2);
    }

    #[test]
    fn closed_subscriber_is_removed() {
        let mgr = SubscriptionManager::new(2);
        let reg = mgr.register(id("0x1"), "newHeads".into());
        drop(reg);
        assert_eq!(mgr.dispatch(&id("0x1"), Value::Null), Dispatch::Gone);
        assert_eq!(mgr.len(), 0);
    }

    #[test]
    fn fail_all_errors_every_subscriber() {
        let mgr = SubscriptionManager::new(2);
        let mut a = mgr.register(id("0xa"), "newHeads".into());
        let mut b = mgr.register(id("0xb"), "newHeads".into());

        mgr.fail_all("connection reset");
        assert!(mgr.is_empty());
        assert!(matches!(a.error.try_recv(), Ok(TransportError::WebSocket(_))));
        assert!(matches!(b.error.try_recv(), Ok(TransportError::WebSocket(_))));
    }

    #[test]
    fn remove_subscription() {
        let mgr = SubscriptionManager::new(2);
        let _reg = mgr.register(id("0x1"), "newHeads".into());
        assert!(mgr.remove(&id("0x1")));
        assert!(!mgr.remove(&id("0x1")));
    }
}
