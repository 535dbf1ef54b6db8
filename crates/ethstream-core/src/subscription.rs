//! Typed server-push subscriptions.
//!
//! A transport hands out a [`RawSubscription`]: a bounded item receiver, a
//! one-shot error side channel and a release hook. [`Subscription`] wraps it,
//! decodes items into `T` and guarantees the release hook runs exactly once.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ChainError, TransportError};

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Errored,
    Closed,
}

/// Hook run once when the subscription is released.
pub type ReleaseHook = Box<dyn FnOnce(&SubscriptionId) + Send + 'static>;

/// Transport-level parts of a live subscription.
pub struct RawSubscription {
    pub id: SubscriptionId,
    pub items: mpsc::Receiver<Value>,
    pub error: oneshot::Receiver<TransportError>,
    pub release: Option<ReleaseHook>,
}

impl RawSubscription {
    pub fn new(
        id: SubscriptionId,
        items: mpsc::Receiver<Value>,
        error: oneshot::Receiver<TransportError>,
    ) -> Self {
        Self {
            id,
            items,
            error,
            release: None,
        }
    }

    /// Attach the hook that tears the subscription down upstream.
    pub fn on_release(mut self, hook: impl FnOnce(&SubscriptionId) + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }
}

/// What a subscription produced next.
#[derive(Debug)]
pub enum SubscriptionEvent<T> {
    Item(T),
    /// The feed broke. No further items follow.
    Error(ChainError),
    /// The feed ended without reporting an error.
    Ended,
}

/// A typed live feed owned by exactly one reader.
pub struct Subscription<T> {
    id: SubscriptionId,
    items: mpsc::Receiver<Value>,
    error: oneshot::Receiver<TransportError>,
    error_open: bool,
    state: SubscriptionState,
    release: Option<ReleaseHook>,
    _item: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> Subscription<T> {
    pub fn from_raw(raw: RawSubscription) -> Self {
        Self {
            id: raw.id,
            items: raw.items,
            error: raw.error,
            error_open: true,
            state: SubscriptionState::Active,
            release: raw.release,
            _item: PhantomData,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Wait for the next item. A pending error always wins over a pending item.
    pub async fn next_event(&mut self) -> SubscriptionEvent<T> {
        if self.state != SubscriptionState::Active {
            return SubscriptionEvent::Ended;
        }

        tokio::select! {
            biased;

            err = wait_error(&mut self.error, &mut self.error_open) => {
                self.state = SubscriptionState::Errored;
                SubscriptionEvent::Error(ChainError::subscription(err))
            }
            item = self.items.recv() => match item {
                Some(value) => match serde_json::from_value::<T>(value) {
                    Ok(item) => SubscriptionEvent::Item(item),
                    Err(e) => {
                        self.state = SubscriptionState::Errored;
                        SubscriptionEvent::Error(ChainError::Decode(format!(
                            "subscription {} item: {e}",
                            self.id
                        )))
                    }
                },
                None => SubscriptionEvent::Ended,
            },
        }
    }

    /// Resolves only when the error side channel fires.
    pub async fn failure(&mut self) -> ChainError {
        let err = wait_error(&mut self.error, &mut self.error_open).await;
        self.state = SubscriptionState::Errored;
        ChainError::subscription(err)
    }
}

impl<T> Subscription<T> {
    /// Release the subscription. Idempotent.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release(&self.id);
        }
        self.items.close();
        self.error_open = false;
        self.state = SubscriptionState::Closed;
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Await the error channel once; afterwards (or if the sender went away
/// silently) stay pending forever so `select!` keeps polling other branches.
async fn wait_error(
    rx: &mut oneshot::Receiver<TransportError>,
    open: &mut bool,
) -> TransportError {
    if *open {
        let received = rx.await;
        *open = false;
        if let Ok(err) = received {
            return err;
        }
    }
    futures::future::pending().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use serde_json::json;

    fn raw(capacity: usize) -> (
        RawSubscription,
        mpsc::Sender<Value>,
        oneshot::Sender<TransportError>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let (etx, erx) = oneshot::channel();
        (RawSubscription::new(SubscriptionId("0x1".into()), rx, erx), tx, etx)
    }

    #[tokio::test]
    async fn items_are_decoded_in_order() {
        let (raw, tx, _etx) = raw(4);
        let mut sub = Subscription::<u64>::from_raw(raw);
        tx.send(json!(1)).await.unwrap();
        tx.send(json!(2)).await.unwrap();

        assert!(matches!(sub.next_event().await, SubscriptionEvent::Item(1)));
        assert!(matches!(sub.next_event().await, SubscriptionEvent::Item(2)));
    }

    #[tokio::test]
    async fn error_wins_over_buffered_items() {
        let (raw, tx, etx) = raw(4);
        let mut sub = Subscription::<u64>::from_raw(raw);
        tx.send(json!(1)).await.unwrap();
        etx.send(TransportError::WebSocket("reset".into())).unwrap();

        assert!(matches!(
            sub.next_event().await,
            SubscriptionEvent::Error(ChainError::Subscription(_))
        ));
        assert_eq!(sub.state(), SubscriptionState::Errored);
        assert!(matches!(sub.next_event().await, SubscriptionEvent::Ended));
    }

    #[tokio::test]
    async fn silent_error_sender_drop_does_not_end_feed() {
        let (raw, tx, etx) = raw(4);
        let mut sub = Subscription::<u64>::from_raw(raw);
        drop(etx);
        tx.send(json!(9)).await.unwrap();
        assert!(matches!(sub.next_event().await, SubscriptionEvent::Item(9)));

        drop(tx);
        assert!(matches!(sub.next_event().await, SubscriptionEvent::Ended));
    }

    #[tokio::test]
    async fn undecodable_item_is_a_decode_error() {
        let (raw, tx, _etx) = raw(4);
        let mut sub = Subscription::<u64>::from_raw(raw);
        tx.send(json!("not a number")).await.unwrap();
        assert!(matches!(
            sub.next_event().await,
            SubscriptionEvent::Error(ChainError::Decode(_))
        ));
    }

    #[test]
    fn release_hook_runs_exactly_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let (raw, _tx, _etx) = raw(1);
        let mut sub = Subscription::<u64>::from_raw(raw.on_release(move |id| {
            assert_eq!(id.0, "0x1");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sub.close();
        sub.close();
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
