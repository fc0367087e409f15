//! Typed, synchronous publish/subscribe.
//!
//! Listeners are keyed by the exact runtime type of the event they accept.
//! There are no wildcard or multi-type listeners.

mod events;

pub use events::{Start, Stop};

use crate::lifecycle::call_guarded;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Listener = Arc<dyn Fn(&dyn Any) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// A simple in-memory event bus
///
/// `publish` runs every matching listener on the calling thread, in
/// subscription order. A listener that returns an error (or panics, when
/// panic isolation is on) is logged and skipped; the publisher never sees it.
#[derive(Clone)]
pub struct EventBus {
    // Map of Event Type -> listeners in subscription order
    listeners: Arc<DashMap<TypeId, Vec<(SubscriptionId, Listener)>>>,
    next_id: Arc<AtomicU64>,
    isolate_panics: bool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_panic_isolation(true)
    }

    /// Whether a panicking listener is caught (`true`) or unwinds into the
    /// publisher (`false`).
    pub fn with_panic_isolation(isolate_panics: bool) -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            isolate_panics,
        }
    }

    /// Subscribe to events of exactly type `E`
    pub fn subscribe<E, F>(&self, listener: F) -> SubscriptionId
    where
        E: Any + Send + Sync,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(event) => listener(event),
            None => Err(anyhow::anyhow!(
                "listener for {} received a foreign event",
                std::any::type_name::<E>()
            )),
        });

        self.listeners
            .entry(TypeId::of::<E>())
            .or_default()
            .push((id, listener));
        tracing::debug!("Subscribed {} to {}", id, std::any::type_name::<E>());
        id
    }

    /// Removes a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(subscription, _)| *subscription != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// Publish an event
    ///
    /// Returns how many listeners handled it successfully.
    pub fn publish<E: Any + Send + Sync>(&self, event: E) -> usize {
        // Snapshot so listeners may (un)subscribe while being called.
        let listeners: Vec<(SubscriptionId, Listener)> = match self.listeners.get(&TypeId::of::<E>()) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        let event_name = std::any::type_name::<E>();
        tracing::debug!("Publishing {} to {} listener(s)", event_name, listeners.len());

        let payload: &dyn Any = &event;
        let mut delivered = 0;
        for (id, listener) in &listeners {
            let outcome = if self.isolate_panics {
                call_guarded(|| listener(payload))
            } else {
                listener(payload)
            };
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => tracing::error!("Listener {} failed on {}: {}", id, event_name, e),
            }
        }
        delivered
    }

    pub fn listener_count<E: Any>(&self) -> usize {
        self.listeners
            .get(&TypeId::of::<E>())
            .map_or(0, |entry| entry.len())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.listeners.len())
            .field("isolate_panics", &self.isolate_panics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    struct OrderPlaced {
        id: u32,
    }

    #[derive(Debug, Clone)]
    struct OrderShipped;

    #[test]
    fn test_dispatch_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |event: &OrderPlaced| {
                seen.lock().push(format!("{}:{}", tag, event.id));
                Ok(())
            });
        }

        assert_eq!(bus.publish(OrderPlaced { id: 9 }), 3);
        assert_eq!(*seen.lock(), vec!["first:9", "second:9", "third:9"]);
    }

    #[test]
    fn test_exact_type_match_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(move |_: &OrderShipped| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(OrderPlaced { id: 1 }), 0);
        assert_eq!(bus.publish(OrderShipped), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listeners_do_not_stop_dispatch() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));

        bus.subscribe(|_: &OrderPlaced| anyhow::bail!("inventory offline"));
        bus.subscribe(|_: &OrderPlaced| panic!("listener bug"));
        let counter = Arc::clone(&reached);
        bus.subscribe(move |_: &OrderPlaced| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(OrderPlaced { id: 2 }), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_listener_failure_is_logged_as_error() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();

        let bus = EventBus::new();
        bus.subscribe(|_: &OrderShipped| anyhow::bail!("carrier offline"));
        let delivered = tracing::subscriber::with_default(subscriber, || bus.publish(OrderShipped));
        assert_eq!(delivered, 0);

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("carrier offline"))
            .unwrap();
        assert!(line.contains("ERROR"), "{}", line);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(|_: &OrderPlaced| Ok(()));
        bus.subscribe(|_: &OrderPlaced| Ok(()));
        assert_eq!(bus.listener_count::<OrderPlaced>(), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.listener_count::<OrderPlaced>(), 1);
        assert_eq!(bus.listener_count::<OrderShipped>(), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_publish() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe(move |_: &OrderPlaced| {
            inner.subscribe(|_: &OrderShipped| Ok(()));
            Ok(())
        });

        assert_eq!(bus.publish(OrderPlaced { id: 3 }), 1);
        assert_eq!(bus.listener_count::<OrderShipped>(), 1);
    }
}
