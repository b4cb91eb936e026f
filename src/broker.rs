//! In-process topic broker.
//!
//! Every subscription owns a bounded queue drained by its own delivery
//! task, which hands each message to the handler on the blocking pool.
//! A blocking or failing handler only affects itself. Publishing never
//! waits on a subscriber: when a queue is full the message is dropped for
//! that subscriber (at-most-once, best-effort).

use crate::reading::PayloadError;
use crate::topic::{self, TopicError, TopicPattern};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task;
use tracing::{debug, error, warn};

pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// A message routed by the broker. `payload` is JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid topic: {0}")]
    InvalidTopic(TopicError),
    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(TopicError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker is closed")]
    Closed,
    #[error("subscriptions require a running tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Subscriber callback. Calls for one subscription run in order on the
/// blocking pool, so a handler may block without stalling the bus.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Publish/subscribe interface the producers, rule engine and bridges talk to.
pub trait MessageBus: Send + Sync {
    /// Route `payload` to every matching subscriber. Returns how many
    /// subscribers accepted it; zero matches is not an error.
    fn publish(&self, topic: &str, payload: String) -> Result<usize, BusError>;

    fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, BusError>;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Serialize `value` as JSON and publish it.
pub fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn MessageBus,
    topic: &str,
    value: &T,
) -> Result<usize, BusError> {
    let payload = serde_json::to_string(value)?;
    bus.publish(topic, payload)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub handler_failures: u64,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

struct Subscriber {
    id: SubscriptionId,
    pattern: TopicPattern,
    queue: mpsc::Sender<Arc<Message>>,
}

struct BrokerInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

/// Cheaply clonable handle to a shared broker.
///
/// Handlers that keep a broker clone (the rule engine does) form a cycle
/// through their subscription; [`Broker::close`] breaks it.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
                closed: AtomicBool::new(false),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Reject further traffic and drop every subscription. Delivery tasks
    /// drain what is already queued and exit.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let removed = {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *subscribers)
        };
        debug!(subscriptions = removed.len(), "Broker closed");
    }

    pub fn stats(&self) -> BrokerStats {
        let counters = &self.inner.counters;
        BrokerStats {
            published: counters.published.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for Broker {
    fn publish(&self, topic: &str, payload: String) -> Result<usize, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        topic::validate_topic(topic).map_err(BusError::InvalidTopic)?;

        let counters = &self.inner.counters;
        counters.published.fetch_add(1, Ordering::Relaxed);

        let message = Arc::new(Message {
            topic: topic.to_string(),
            payload,
        });

        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut accepted = 0;
        for subscriber in subscribers.iter().filter(|s| s.pattern.matches(topic)) {
            match subscriber.queue.try_send(Arc::clone(&message)) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = %subscriber.id,
                        pattern = subscriber.pattern.as_str(),
                        topic,
                        "Subscriber queue full, message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscription = %subscriber.id, topic, "Subscriber gone, message dropped");
                }
            }
        }

        if accepted == 0 {
            debug!(topic, "No subscribers for topic");
        }
        Ok(accepted)
    }

    fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let pattern = TopicPattern::parse(pattern).map_err(BusError::InvalidPattern)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (queue, receiver) = mpsc::channel(self.inner.queue_capacity);

        runtime.spawn(deliver(
            id,
            pattern.as_str().to_string(),
            handler,
            receiver,
            Arc::clone(&self.inner.counters),
        ));

        debug!(subscription = %id, pattern = pattern.as_str(), "Subscription created");
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, pattern, queue });

        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        let removed = subscribers.len() != before;
        if removed {
            debug!(subscription = %id, "Subscription removed");
        }
        removed
    }
}

async fn deliver(
    id: SubscriptionId,
    pattern: String,
    handler: Arc<dyn MessageHandler>,
    mut receiver: mpsc::Receiver<Arc<Message>>,
    counters: Arc<Counters>,
) {
    while let Some(message) = receiver.recv().await {
        // Handlers may block, so they run off the async workers
        let call = {
            let handler = Arc::clone(&handler);
            let message = Arc::clone(&message);
            task::spawn_blocking(move || panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&message))))
        };
        let outcome = match call.await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(subscription = %id, error = %e, "Handler call cancelled");
                break;
            }
        };
        match outcome {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(HandlerError::Payload(e))) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subscription = %id,
                    pattern = pattern.as_str(),
                    topic = message.topic.as_str(),
                    error = %e,
                    "Dropped malformed payload"
                );
            }
            Ok(Err(e)) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subscription = %id,
                    pattern = pattern.as_str(),
                    topic = message.topic.as_str(),
                    error = %e,
                    "Subscriber handler failed"
                );
            }
            Err(_) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscription = %id,
                    pattern = pattern.as_str(),
                    topic = message.topic.as_str(),
                    "Subscriber handler panicked"
                );
            }
        }
    }
    debug!(subscription = %id, "Delivery task finished");
}
