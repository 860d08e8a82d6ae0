//! In-process publish/subscribe message bus.
//!
//! [`MessageBus`] routes [`Event`]s to handlers subscribed on the event's
//! [`Topic`]. Publishing never blocks: the event is queued on a *lane*
//! keyed by `(topic, conversation_key)` and a lane worker delivers it.
//!
//! # Delivery guarantees
//!
//! - Subscribers are snapshotted at publish time. A handler subscribed
//!   afterwards never sees the event.
//! - Every subscriber gets its own copy. Handlers of one event run
//!   concurrently, each in its own task, so an error or a panic in one
//!   is contained, logged as a [`DeliveryError`] and counted.
//! - Events sharing a topic and conversation key are delivered strictly
//!   in publish order: the lane waits for every handler of an event
//!   before starting the next one. Different keys run in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace, warn};

use skein_types::error::{DeliveryError, SkeinError};
use skein_types::event::{Event, Topic};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives events for a subscribed topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Identifies a subscription for [`MessageBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

struct Delivery {
    event: Event,
    subscribers: Vec<Subscriber>,
}

type LaneKey = (Topic, String);

struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
    /// Deliveries sent to this lane and not yet finished.
    pending: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Shared {
    subscriptions: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    lanes: DashMap<LaneKey, Lane>,
    next_subscription: AtomicU64,
    next_lane: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
    failures: AtomicU64,
}

impl Shared {
    fn finish_delivery(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Topic-based publish/subscribe router with per-key FIFO delivery.
///
/// Cheap to share behind an `Arc`. Must be used from within a tokio
/// runtime since lane workers are spawned tasks.
#[derive(Default)]
pub struct MessageBus {
    shared: Arc<Shared>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event later published on `topic`.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared
            .subscriptions
            .write()
            .entry(topic)
            .or_default()
            .push(Subscriber { id, handler });
        debug!(%topic, subscription = id.0, "subscribed");
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    ///
    /// Events already published keep their snapshot and may still reach
    /// the handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.shared.subscriptions.write();
        for list in subs.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                debug!(subscription = id.0, "unsubscribed");
                return true;
            }
        }
        false
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.shared
            .subscriptions
            .read()
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Queue `event` for delivery and return immediately.
    ///
    /// Fails only when the bus is closed or no tokio runtime is running.
    pub fn publish(&self, event: Event) -> Result<(), SkeinError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SkeinError::Bus("bus is closed".into()));
        }

        let subscribers = self
            .shared
            .subscriptions
            .read()
            .get(&event.topic)
            .cloned()
            .unwrap_or_default();
        if subscribers.is_empty() {
            trace!(topic = %event.topic, event_id = %event.id, "no subscribers, dropping event");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SkeinError::Bus("publish called outside a tokio runtime".into()))?;

        debug!(
            topic = %event.topic,
            event_id = %event.id,
            conversation_key = %event.conversation_key,
            subscribers = subscribers.len(),
            "publishing event"
        );

        let key = (event.topic, event.conversation_key.clone());
        let delivery = Delivery { event, subscribers };
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);

        match self.shared.lanes.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let lane = entry.get();
                lane.pending.fetch_add(1, Ordering::SeqCst);
                if let Err(mpsc::error::SendError(delivery)) = lane.tx.send(delivery) {
                    // Worker exited without retiring the lane; replace it.
                    let lane = self.open_lane(&runtime, key, delivery);
                    entry.insert(lane);
                }
            }
            Entry::Vacant(entry) => {
                let lane = self.open_lane(&runtime, key, delivery);
                entry.insert(lane);
            }
        }
        Ok(())
    }

    fn open_lane(
        &self,
        runtime: &tokio::runtime::Handle,
        key: LaneKey,
        first: Delivery,
    ) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(1));
        let id = self.shared.next_lane.fetch_add(1, Ordering::Relaxed);
        // Cannot fail: the receiver is alive until the worker starts.
        let _ = tx.send(first);
        runtime.spawn(run_lane(
            Arc::clone(&self.shared),
            key,
            id,
            rx,
            Arc::clone(&pending),
        ));
        Lane { id, tx, pending }
    }

    /// Reject further publishes. Already queued events are still delivered.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!("message bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Resolve once every queued delivery, including deliveries published
    /// by handlers while this waits, has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Total handler failures (errors and panics) since creation.
    pub fn delivery_failures(&self) -> u64 {
        self.shared.failures.load(Ordering::Relaxed)
    }
}

async fn run_lane(
    shared: Arc<Shared>,
    key: LaneKey,
    lane_id: u64,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    pending: Arc<AtomicUsize>,
) {
    trace!(topic = %key.0, conversation_key = %key.1, lane = lane_id, "lane started");
    while let Some(delivery) = rx.recv().await {
        deliver(&shared, delivery).await;
        pending.fetch_sub(1, Ordering::SeqCst);
        shared.finish_delivery();

        if pending.load(Ordering::SeqCst) == 0 {
            // Publishers bump `pending` under the same shard lock, so an
            // empty lane observed here stays empty until it is removed.
            let retired = shared.lanes.remove_if(&key, |_, lane| {
                lane.id == lane_id && lane.pending.load(Ordering::SeqCst) == 0
            });
            if retired.is_some() {
                break;
            }
        }
    }
    trace!(topic = %key.0, conversation_key = %key.1, lane = lane_id, "lane retired");
}

async fn deliver(shared: &Shared, delivery: Delivery) {
    let Delivery { event, subscribers } = delivery;

    let tasks: Vec<_> = subscribers
        .into_iter()
        .map(|sub| {
            let event = event.clone();
            let task = tokio::spawn(async move { sub.handler.handle(event).await });
            (sub.id, task)
        })
        .collect();

    for (id, task) in tasks {
        let reason = match task.await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(join) if join.is_panic() => panic_message(join.into_panic()),
            Err(join) => join.to_string(),
        };
        shared.failures.fetch_add(1, Ordering::Relaxed);
        let err = DeliveryError {
            subscription: id.0,
            topic: event.topic,
            event_id: event.id.clone(),
            reason,
        };
        warn!(error = %err, "event delivery failed");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
