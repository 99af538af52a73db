//! Event broadcast hub
//!
//! Fan-out of committed `StageEvent`s to live observers (SSE clients, the
//! floor displays). The hub sits outside the transactional path:
//! - `publish` never blocks and never fails; events go into a bounded
//!   dispatch queue drained by a dedicated worker task
//! - every event carries a sequence number taken at `publish`, and every
//!   subscription the sequence current when it registered, so an event only
//!   reaches subscribers that existed when it was published
//! - each subscriber owns a bounded channel, so delivery to one subscriber is
//!   always in publish order
//! - a subscriber whose channel is full or closed is dropped, not retried,
//!   and never delays delivery to the others

use super::StageEvent;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle identifying one subscriber
pub type SubscriptionId = Uuid;

/// Registered subscriber: first sequence number it may receive, and its channel
struct Subscriber {
    start_seq: u64,
    tx: mpsc::Sender<StageEvent>,
}

type Registry = Mutex<HashMap<SubscriptionId, Subscriber>>;

/// Central distribution point for stage events
///
/// Cloning is cheap; all clones feed the same dispatcher and share one
/// subscriber registry. The dispatcher task stops once every clone is dropped.
///
/// # Capacity Recommendations
///
/// - `dispatch_capacity`: events buffered between publishers and the
///   dispatcher (production: 1024, tests: 16-64)
/// - `subscriber_buffer`: events a single subscriber may fall behind before
///   it is dropped (production: 256)
///
/// # Examples
///
/// ```rust,ignore
/// let hub = EventHub::new(1024, 256); // inside a tokio runtime
/// let mut sub = hub.subscribe();
/// hub.publish(event);
/// let received = sub.recv().await;
/// ```
#[derive(Clone)]
pub struct EventHub {
    dispatch: mpsc::Sender<(u64, StageEvent)>,
    registry: Arc<Registry>,
    /// Sequence number of the last published event
    last_seq: Arc<AtomicU64>,
    capacity: usize,
    subscriber_buffer: usize,
}

impl EventHub {
    /// Creates a hub and spawns its dispatcher on the current tokio runtime
    ///
    /// Zero capacities are raised to 1.
    pub fn new(dispatch_capacity: usize, subscriber_buffer: usize) -> Self {
        let capacity = dispatch_capacity.max(1);
        let subscriber_buffer = subscriber_buffer.max(1);
        let (dispatch, rx) = mpsc::channel(capacity);
        let registry = Arc::new(Registry::default());

        tokio::spawn(dispatch_loop(rx, Arc::clone(&registry)));
        info!(capacity, subscriber_buffer, "Event hub initialized");

        Self {
            dispatch,
            registry,
            last_seq: Arc::new(AtomicU64::new(0)),
            capacity,
            subscriber_buffer,
        }
    }

    /// Hand an event to the dispatcher
    ///
    /// Returns immediately. If the dispatch queue is full the event is
    /// dropped with a warning; the caller is never told, because the
    /// transition it describes has already committed.
    pub fn publish(&self, event: StageEvent) {
        let seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;

        match self.dispatch.try_send((seq, event)) {
            Ok(()) => {}
            Err(TrySendError::Full((_, event))) => {
                warn!(
                    event_type = event.event_type.as_str(),
                    flask_id = event.flask_id,
                    "Event dispatch queue full, dropping event"
                );
            }
            Err(TrySendError::Closed((_, event))) => {
                warn!(
                    event_type = event.event_type.as_str(),
                    flask_id = event.flask_id,
                    "Event dispatcher stopped, dropping event"
                );
            }
        }
    }

    /// Register a new subscriber
    ///
    /// The subscription receives every event published after this call and
    /// none published before it.
    /// Dropping it deregisters it.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let count = {
            let mut subscribers = lock(&self.registry);
            // Read under the registry lock so fan-out of any later event sees
            // this entry
            let start_seq = self.last_seq.load(Ordering::SeqCst) + 1;
            subscribers.insert(id, Subscriber { start_seq, tx });
            subscribers.len()
        };
        debug!(subscriber = %id, subscribers = count, "Subscriber registered");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deregister a subscriber
    ///
    /// Events already queued for it can still be drained; after that its
    /// stream ends. Returns false if the id was not registered (already
    /// dropped or unsubscribed).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = lock(&self.registry).remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Subscriber unregistered");
        }
        removed
    }

    /// Get the current number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Get the configured dispatch queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One registered observer
///
/// Yields events in publish order via `recv` or as a `Stream`.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<StageEvent>,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Handle for `EventHub::unsubscribe`
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once the subscription has been
    /// dropped by the hub (lagging, unsubscribed, or hub shut down)
    pub async fn recv(&mut self) -> Option<StageEvent> {
        self.rx.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<StageEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = StageEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StageEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.id);
        }
    }
}

/// Registry lock that survives a poisoned mutex; the map holds no invariant
/// a panicking holder could break.
fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn dispatch_loop(mut rx: mpsc::Receiver<(u64, StageEvent)>, registry: Arc<Registry>) {
    while let Some((seq, event)) = rx.recv().await {
        fan_out(&registry, seq, &event);
    }
    debug!("Event hub dispatcher stopped");
}

fn fan_out(registry: &Registry, seq: u64, event: &StageEvent) {
    let mut subscribers = lock(registry);
    subscribers.retain(|id, subscriber| {
        if seq < subscriber.start_seq {
            // published before this subscriber registered
            return true;
        }
        deliver(id, subscriber, event)
    });
}

/// Returns false when the subscriber must be dropped
fn deliver(id: &SubscriptionId, subscriber: &Subscriber, event: &StageEvent) -> bool {
    match subscriber.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(
                subscriber = %id,
                event_type = event.event_type.as_str(),
                "Subscriber not keeping up, dropping it"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(subscriber = %id, "Subscriber disconnected");
            false
        }
    }
}
