//! Pub/sub event fan-out.
//!
//! Grounded on `lymph.events.base.BaseEventSystem`/`MessageHandler`: services
//! emit named [`Event`]s with an opaque body, and any number of handlers
//! subscribed to that name are invoked with it. A handler's error never
//! kills the dispatch loop - it's routed to `on_error` instead, mirroring the
//! source's catch-and-hook behaviour around `handle_message`. `subscribe`
//! returns a token alongside the subscription so `unsubscribe` can
//! deterministically retire one handler without guessing from receiver drop
//! or lag, matching `BaseEventSystem.subscribe(container, handler)` /
//! `unsubscribe(container, handler)` taking the handler as the deregistration
//! key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lymph_proto::LymphError;
use tokio::sync::{broadcast, Notify};
use tracing::warn;

/// A published event: a name plus an opaque, serializer-encoded body.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub body: Bytes,
    pub headers: HashMap<String, String>,
}

impl Event {
    pub fn new(name: impl Into<String>, body: Bytes) -> Self {
        Self {
            name: name.into(),
            body,
            headers: HashMap::new(),
        }
    }
}

/// Opaque token identifying one `subscribe` call, handed back so the caller
/// can later `unsubscribe` that exact registration.
pub type SubscriptionId = u64;

#[derive(Debug)]
pub enum SubscriptionError {
    /// The handler fell behind the broadcast buffer; `n` events were dropped.
    Lagged(u64),
    /// No further events will arrive: the backend shut down or the caller
    /// unsubscribed.
    Closed,
}

/// A live subscription returned by [`EventSystem::subscribe`]. Cancelling via
/// [`EventSystem::unsubscribe`] makes the next (or in-flight) `recv` return
/// `Err(SubscriptionError::Closed)`.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<Event, SubscriptionError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(SubscriptionError::Closed);
        }
        tokio::select! {
            _ = self.notify.notified() => Err(SubscriptionError::Closed),
            result = self.receiver.recv() => result.map_err(|e| match e {
                broadcast::error::RecvError::Lagged(skipped) => SubscriptionError::Lagged(skipped),
                broadcast::error::RecvError::Closed => SubscriptionError::Closed,
            }),
        }
    }
}

/// A pluggable event backend: emits events and lets callers subscribe to a
/// name. Only an in-memory backend ships here, matching `backends.events =
/// "memory"` in [`lymph_config::BootstrapConfig`]; other backends (AMQP,
/// Kafka, ...) are installed by the embedding application.
#[async_trait]
pub trait EventSystem: Send + Sync {
    async fn emit(&self, event: Event) -> Result<(), LymphError>;

    /// Register interest in `name`, returning a token that later retires
    /// exactly this registration via [`EventSystem::unsubscribe`].
    fn subscribe(&self, name: &str) -> (SubscriptionId, Subscription);

    /// Deregister a subscription returned by `subscribe`. Unknown or
    /// already-retired ids are a no-op.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Called once as the container starts, before any interface `on_start`.
    fn on_start(&self) {}

    /// Called once as the container stops, after every interface's
    /// `on_stop`.
    fn on_stop(&self) {}
}

/// Process-local fan-out: one `broadcast` channel per event name, created on
/// first subscribe or emit.
pub struct InMemoryEventSystem {
    topics: DashMap<String, broadcast::Sender<Event>>,
    capacity: usize,
    subscriptions: DashMap<SubscriptionId, (Arc<AtomicBool>, Arc<Notify>)>,
    next_id: AtomicU64,
}

impl InMemoryEventSystem {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            capacity: 256,
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    fn topic(&self, name: &str) -> broadcast::Sender<Event> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryEventSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSystem for InMemoryEventSystem {
    async fn emit(&self, event: Event) -> Result<(), LymphError> {
        let sender = self.topic(&event.name);
        // No subscribers is not an error - matches the source treating emit
        // as fire-and-forget regardless of listener count.
        let _ = sender.send(event);
        Ok(())
    }

    fn subscribe(&self, name: &str) -> (SubscriptionId, Subscription) {
        let receiver = self.topic(name).subscribe();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        self.subscriptions.insert(id, (cancelled.clone(), notify.clone()));
        (id, Subscription { receiver, cancelled, notify })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, (cancelled, notify))) = self.subscriptions.remove(&id) {
            cancelled.store(true, Ordering::Release);
            notify.notify_waiters();
        }
    }
}

/// Runs a handler against every event on a subscription, routing panics and
/// errors to `on_error` instead of killing the dispatch loop.
pub struct MessageHandler<F> {
    handler: F,
    on_error: Arc<dyn Fn(&LymphError) + Send + Sync>,
}

impl<F, Fut> MessageHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), LymphError>> + Send,
{
    pub fn new(handler: F, on_error: impl Fn(&LymphError) + Send + Sync + 'static) -> Self {
        Self {
            handler,
            on_error: Arc::new(on_error),
        }
    }

    pub async fn run(&self, mut subscription: Subscription) {
        loop {
            match subscription.recv().await {
                Ok(event) => {
                    if let Err(e) = (self.handler)(event).await {
                        (self.on_error)(&e);
                    }
                }
                Err(SubscriptionError::Lagged(skipped)) => {
                    warn!(skipped, "event handler lagged, dropping events");
                }
                Err(SubscriptionError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let system = InMemoryEventSystem::new();
        let (_id, mut sub) = system.subscribe("user.created");
        system
            .emit(Event::new("user.created", Bytes::from_static(b"42")))
            .await
            .unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.body, Bytes::from_static(b"42"));
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_is_not_an_error() {
        let system = InMemoryEventSystem::new();
        let result = system.emit(Event::new("nobody.listens", Bytes::new())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let system = InMemoryEventSystem::new();
        let (id, mut sub) = system.subscribe("user.created");
        system.unsubscribe(id);
        system.emit(Event::new("user.created", Bytes::new())).await.unwrap();

        assert!(matches!(sub.recv().await, Err(SubscriptionError::Closed)));
    }

    #[tokio::test]
    async fn unsubscribe_is_a_no_op_for_unknown_ids() {
        let system = InMemoryEventSystem::new();
        system.unsubscribe(9999);
    }

    #[tokio::test]
    async fn message_handler_routes_errors_to_on_error() {
        let system = Arc::new(InMemoryEventSystem::new());
        let (_id, sub) = system.subscribe("task.failed");
        let error_count = Arc::new(AtomicUsize::new(0));
        let error_count_clone = error_count.clone();

        let handler = MessageHandler::new(
            |_event: Event| async move {
                Err(LymphError::LookupFailure {
                    service: "broken".to_string(),
                })
            },
            move |_e| {
                error_count_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        let run_handle = tokio::spawn(async move { handler.run(sub).await });
        system.emit(Event::new("task.failed", Bytes::new())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        run_handle.abort();

        assert_eq!(error_count.load(Ordering::SeqCst), 1);
    }
}
