//! ==============================================================================
//! hub.rs - live fan-out of accepted readings
//! ==============================================================================
//!
//! purpose:
//!     every live viewer gets its own bounded queue. `publish` pushes into each
//!     queue with `try_send` and returns immediately, so a slow viewer only
//!     ever loses its own readings and never holds up the device or the other
//!     viewers.
//!
//! delivery:
//!     each queue is drained by a dedicated task (server.rs, one per websocket)
//!     that owns the `Subscription`. dropping the subscription unsubscribes.
//!
//! ```text
//!     ┌──────────┐  publish   ┌──────────────┐  recv   ┌───────────────┐
//!     │ ingest   │ ─────────▶ │ queue (cap N) │ ──────▶ │ viewer task 1 │
//!     │ service  │  try_send  ├──────────────┤         ├───────────────┤
//!     │          │ ─────────▶ │ queue (cap N) │ ──────▶ │ viewer task 2 │
//!     └──────────┘            └──────────────┘         └───────────────┘
//! ```
//!
//! guarantees:
//!     - a subscription sees readings published after `subscribe` returned
//!     - within one subscription, readings arrive in publish order
//!     - after `unsubscribe` returns, no later publish reaches that handle
//!     - no replay: a viewer that falls behind or reconnects backfills from
//!       the history endpoint
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::Reading;
use crate::error::{DeliveryError, SubscribeError};

/// identifies one registration with the hub
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// outcome of one publish, per subscriber
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub disconnected: usize,
}

#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: Mutex<HashMap<SubscriptionHandle, mpsc::Sender<Reading>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    max_subscribers: usize,
}

impl HubInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriptionHandle, mpsc::Sender<Reading>>> {
        // the map stays consistent even if a holder panicked
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers().remove(&handle).is_some()
    }
}

impl BroadcastHub {
    /// `queue_capacity` readings may wait per subscriber; at most
    /// `max_subscribers` may be registered at once
    pub fn new(queue_capacity: usize, max_subscribers: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
                max_subscribers,
            }),
        }
    }

    pub fn subscribe(&self) -> Result<Subscription, SubscribeError> {
        let mut subscribers = self.inner.subscribers();
        if subscribers.len() >= self.inner.max_subscribers {
            return Err(SubscribeError::LimitReached(self.inner.max_subscribers));
        }

        let handle = SubscriptionHandle(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        subscribers.insert(handle, tx);
        tracing::debug!(subscriber = handle.0, total = subscribers.len(), "subscriber joined");

        Ok(Subscription {
            handle,
            receiver: rx,
            hub: Arc::downgrade(&self.inner),
        })
    }

    /// remove a registration; unknown or already removed handles are ignored
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.inner.remove(handle) {
            tracing::debug!(subscriber = handle.0, "subscriber left");
        }
    }

    /// hand `reading` to every current subscriber without waiting on any of them
    pub fn publish(&self, reading: &Reading) -> PublishReport {
        let mut report = PublishReport::default();
        let mut subscribers = self.inner.subscribers();

        subscribers.retain(|handle, tx| match tx.try_send(*reading) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.dropped += 1;
                tracing::warn!(subscriber = handle.0, error = %DeliveryError::QueueFull, "live delivery skipped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.disconnected += 1;
                tracing::debug!(subscriber = handle.0, error = %DeliveryError::Disconnected, "pruning subscriber");
                false
            }
        });

        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

/// a live registration; readings arrive through `recv`
pub struct Subscription {
    handle: SubscriptionHandle,
    receiver: mpsc::Receiver<Reading>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// next reading, or `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Reading> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Reading> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.handle);
        }
    }
}
