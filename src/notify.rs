//! Notification routing.
//!
//! Unsolicited envelopes (anything the correlator did not claim) are fanned
//! out to subscriptions by topic. Each subscription owns a bounded queue and
//! a delivery task, so the read loop never waits on a callback:
//!
//! ```text
//! read loop ──► dispatch() ──try_send──► queue ──► task ──► callback
//!                          └─try_send──► queue ──► task ──► callback
//! ```
//!
//! A full queue drops the envelope for that subscriber only. Callback errors
//! and panics are logged and never reach the read loop or other subscribers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::Envelope;

/// Default per-subscription queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Error a subscriber callback may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Arc<dyn Fn(&Envelope) -> Result<(), CallbackError> + Send + Sync>;

/// Which envelopes a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Every unsolicited envelope.
    Any,
    /// Envelopes whose `method` equals the name.
    Method(String),
    /// Envelopes whose `method` starts with the prefix, e.g. `ChangeGroup.`.
    Prefix(String),
}

impl Topic {
    pub fn method(name: impl Into<String>) -> Self {
        Topic::Method(name.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Topic::Prefix(prefix.into())
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Topic::Any => true,
            Topic::Method(name) => envelope.method() == Some(name.as_str()),
            Topic::Prefix(prefix) => envelope
                .method()
                .is_some_and(|m| m.starts_with(prefix.as_str())),
        }
    }
}

/// Handle returned by [`NotificationRouter::subscribe`].
///
/// Dropping the handle does not unsubscribe; pass it to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    topic: Topic,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

struct Route {
    topic: Topic,
    tx: mpsc::Sender<Envelope>,
}

/// Fans unsolicited envelopes out to subscribers.
pub struct NotificationRouter {
    routes: Mutex<HashMap<u64, Route>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register `callback` for envelopes matching `topic`.
    ///
    /// Spawns the subscription's delivery task, so this must be called from
    /// within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Envelope) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        tokio::spawn(deliver(id, rx, Arc::new(callback)));

        self.routes.lock().insert(
            id,
            Route {
                topic: topic.clone(),
                tx,
            },
        );
        tracing::debug!(subscription = id, ?topic, "subscribed");
        Subscription { id, topic }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    ///
    /// Envelopes already queued for it are still delivered.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let removed = self.routes.lock().remove(&subscription.id).is_some();
        if removed {
            tracing::debug!(subscription = subscription.id, "unsubscribed");
        }
        removed
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }

    /// Queue `envelope` for every matching subscription.
    ///
    /// Never blocks. Returns how many subscriptions accepted it.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        let mut routes = self.routes.lock();
        for (id, route) in routes.iter() {
            if !route.topic.matches(envelope) {
                continue;
            }
            match route.tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscription = id,
                        method = envelope.method().unwrap_or_default(),
                        "subscriber queue full, dropping notification"
                    );
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        for id in dead {
            routes.remove(&id);
        }
        delivered
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.routes.lock().clear();
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver(id: u64, mut rx: mpsc::Receiver<Envelope>, callback: Callback) {
    while let Some(envelope) = rx.recv().await {
        let method = envelope.method().unwrap_or_default();
        match catch_unwind(AssertUnwindSafe(|| callback(&envelope))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(subscription = id, method, error = %e, "subscriber callback failed");
            }
            Err(_) => {
                tracing::error!(subscription = id, method, "subscriber callback panicked");
            }
        }
    }
}
