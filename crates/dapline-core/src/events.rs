//! Event dispatch: ephemeral listeners and persistent subscriptions
//!
//! Inbound DAP events are fanned out to two kinds of consumers:
//!
//! - **Listeners**: transient callbacks bound to a bounded operation, many
//!   per event type, invoked in registration order.
//! - **Subscriptions**: one persistent callback per event type, with an
//!   optional filter predicate deciding delivery per event; registering a
//!   new one replaces the old.
//!
//! A panicking callback is isolated and logged; it never affects other
//! consumers or the dispatching connection.

use crate::protocol::DapEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Callback invoked with a dispatched event
pub type EventCallback = Arc<dyn Fn(&DapEvent) + Send + Sync>;

/// Predicate deciding whether a subscription receives a given event
pub type EventFilter = Arc<dyn Fn(&DapEvent) -> bool + Send + Sync>;

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    callback: EventCallback,
}

struct SubscriptionEntry {
    filter: Option<EventFilter>,
    callback: EventCallback,
}

/// Routes inbound events to listeners and subscriptions.
///
/// The maps are mutated only in synchronous sections; dispatch snapshots
/// the callbacks before invoking them, so a callback may freely register or
/// remove listeners.
pub struct EventDispatcher {
    listeners: Mutex<HashMap<String, Vec<ListenerEntry>>>,
    subscriptions: Mutex<HashMap<String, SubscriptionEntry>>,
    next_listener_id: AtomicU64,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Register a transient listener for an event type
    pub fn add_event_listener(
        &self,
        event_type: impl Into<String>,
        callback: EventCallback,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .entry(event_type.into())
            .or_default()
            .push(ListenerEntry { id, callback });
        id
    }

    /// Remove a previously registered listener; returns whether it existed
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event_type);
        }
        removed
    }

    /// Install the persistent subscription for an event type, replacing any
    /// existing one. With a filter, only events the predicate accepts reach
    /// the callback.
    pub fn subscribe_to_event(
        &self,
        event_type: impl Into<String>,
        filter: Option<EventFilter>,
        callback: EventCallback,
    ) {
        let event_type = event_type.into();
        if self
            .subscriptions
            .lock()
            .insert(event_type.clone(), SubscriptionEntry { filter, callback })
            .is_some()
        {
            debug!(event_type = %event_type, "replaced existing event subscription");
        }
    }

    /// Remove the persistent subscription for an event type
    pub fn unsubscribe_from_event(&self, event_type: &str) -> bool {
        self.subscriptions.lock().remove(event_type).is_some()
    }

    /// Drop every persistent subscription (part of the registry hard reset)
    pub fn clear_subscriptions(&self) {
        self.subscriptions.lock().clear();
    }

    /// Number of listeners currently registered for an event type
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .lock()
            .get(event_type)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Deliver an event to every listener for its type (registration
    /// order), then to the persistent subscription, if any.
    pub fn dispatch(&self, event: &DapEvent) {
        let callbacks: Vec<EventCallback> = self
            .listeners
            .lock()
            .get(&event.event)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
            .unwrap_or_default();

        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(event_type = %event.event, "event listener panicked");
            }
        }

        let subscription = self
            .subscriptions
            .lock()
            .get(&event.event)
            .map(|entry| (entry.filter.clone(), Arc::clone(&entry.callback)));
        if let Some((filter, callback)) = subscription {
            let delivery = catch_unwind(AssertUnwindSafe(|| {
                if filter.map_or(true, |accepts| accepts(event)) {
                    callback(event);
                }
            }));
            if delivery.is_err() {
                error!(event_type = %event.event, "event subscription callback panicked");
            }
        }
    }

    /// Collect events of the given types for a bounded window.
    ///
    /// Completes when `max_events` have been collected or `timeout`
    /// elapses, whichever comes first. It always succeeds; a pure timeout
    /// yields an empty list. Listener cleanup happens exactly once on every
    /// exit path.
    pub async fn listen_for_events(
        &self,
        event_types: &[String],
        timeout: Duration,
        max_events: usize,
    ) -> Vec<DapEvent> {
        if event_types.is_empty() || max_events == 0 {
            return Vec::new();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DapEvent>();
        let registered: Vec<(String, ListenerId)> = event_types
            .iter()
            .map(|event_type| {
                let tx = tx.clone();
                let id = self.add_event_listener(
                    event_type.clone(),
                    Arc::new(move |event: &DapEvent| {
                        // Collector may have stopped already; ignore
                        let _ = tx.send(event.clone());
                    }),
                );
                (event_type.clone(), id)
            })
            .collect();

        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while collected.len() < max_events {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => collected.push(event),
                Ok(None) => {
                    // All senders dropped; cannot happen while we hold `tx`
                    warn!("event collection channel closed early");
                    break;
                }
                Err(_) => break,
            }
        }

        for (event_type, id) in registered {
            self.remove_event_listener(&event_type, id);
        }
        collected
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn stopped_event(seq: i64) -> DapEvent {
        DapEvent {
            seq,
            event: "stopped".to_string(),
            body: Some(json!({"reason": "breakpoint"})),
        }
    }

    #[test]
    fn test_listeners_fire_in_registration_order_then_subscription() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let order = Arc::clone(&order);
            dispatcher.add_event_listener(
                "stopped",
                Arc::new(move |_| order.lock().push(label)),
            );
        }
        let order_sub = Arc::clone(&order);
        dispatcher.subscribe_to_event("stopped", None, Arc::new(move |_| {
            order_sub.lock().push("subscription")
        }));

        dispatcher.dispatch(&stopped_event(1));
        assert_eq!(*order.lock(), vec!["first", "second", "subscription"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.add_event_listener("stopped", Arc::new(|_| panic!("listener bug")));
        let hits_clone = Arc::clone(&hits);
        dispatcher.add_event_listener(
            "stopped",
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let hits_sub = Arc::clone(&hits);
        dispatcher.subscribe_to_event(
            "stopped",
            None,
            Arc::new(move |_| {
                hits_sub.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&stopped_event(1));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscription_replacement_is_single_slot() {
        let dispatcher = EventDispatcher::new();
        let old_hits = Arc::new(AtomicUsize::new(0));
        let new_hits = Arc::new(AtomicUsize::new(0));

        let old_clone = Arc::clone(&old_hits);
        dispatcher.subscribe_to_event(
            "output",
            None,
            Arc::new(move |_| {
                old_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let new_clone = Arc::clone(&new_hits);
        dispatcher.subscribe_to_event(
            "output",
            None,
            Arc::new(move |_| {
                new_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&DapEvent {
            seq: 1,
            event: "output".to_string(),
            body: None,
        });
        assert_eq!(old_hits.load(Ordering::SeqCst), 0);
        assert_eq!(new_hits.load(Ordering::SeqCst), 1);

        assert!(dispatcher.unsubscribe_from_event("output"));
        assert!(!dispatcher.unsubscribe_from_event("output"));
    }

    #[test]
    fn test_subscription_filter_skips_non_matching_events() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let filter: EventFilter = Arc::new(|event: &DapEvent| {
            event
                .body
                .as_ref()
                .map_or(false, |body| body["reason"] == "breakpoint")
        });
        let hits_clone = Arc::clone(&hits);
        dispatcher.subscribe_to_event(
            "stopped",
            Some(filter),
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&DapEvent {
            seq: 1,
            event: "stopped".to_string(),
            body: Some(json!({"reason": "step"})),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        dispatcher.dispatch(&stopped_event(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_event_listener() {
        let dispatcher = EventDispatcher::new();
        let id = dispatcher.add_event_listener("stopped", Arc::new(|_| {}));
        assert_eq!(dispatcher.listener_count("stopped"), 1);
        assert!(dispatcher.remove_event_listener("stopped", id));
        assert!(!dispatcher.remove_event_listener("stopped", id));
        assert_eq!(dispatcher.listener_count("stopped"), 0);
    }

    #[tokio::test]
    async fn test_listen_for_events_stops_at_max_events() {
        let dispatcher = Arc::new(EventDispatcher::new());

        let background = Arc::clone(&dispatcher);
        let producer = tokio::spawn(async move {
            for seq in 1..=10 {
                background.dispatch(&stopped_event(seq));
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let events = dispatcher
            .listen_for_events(
                &["stopped".to_string()],
                Duration::from_secs(5),
                3,
            )
            .await;
        producer.abort();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].seq, 1);
        assert_eq!(dispatcher.listener_count("stopped"), 0);
    }

    #[tokio::test]
    async fn test_listen_for_events_times_out_with_empty_list() {
        let dispatcher = EventDispatcher::new();
        let started = Instant::now();

        let events = dispatcher
            .listen_for_events(
                &["stopped".to_string(), "output".to_string()],
                Duration::from_millis(50),
                5,
            )
            .await;

        assert!(events.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(dispatcher.listener_count("stopped"), 0);
        assert_eq!(dispatcher.listener_count("output"), 0);
    }

    #[tokio::test]
    async fn test_listen_for_events_zero_max_returns_immediately() {
        let dispatcher = EventDispatcher::new();
        let events = dispatcher
            .listen_for_events(&["stopped".to_string()], Duration::from_secs(30), 0)
            .await;
        assert!(events.is_empty());
    }
}
