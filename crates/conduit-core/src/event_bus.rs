//! Fan-out of domain events to listeners.
//!
//! There are two ways to listen:
//! - callbacks registered with [`EventBus::subscribe`], invoked synchronously
//!   in registration order on the task that emits
//! - a tokio broadcast receiver from [`EventBus::channel`], for consumers that
//!   want to `.await` events
//!
//! A panicking callback is logged and skipped. The remaining callbacks still
//! see the event.
//!
//! # Example
//!
//! ```rust
//! use conduit_core::event_bus::EventBus;
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(|event| println!("{}", event.type_name()));
//! assert_eq!(bus.subscriber_count(), 1);
//! subscription.unsubscribe();
//! assert_eq!(bus.subscriber_count(), 0);
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;

use crate::event::DomainEvent;

/// Buffered events per channel receiver before it starts lagging.
const DEFAULT_CAPACITY: usize = 1024;

pub type Listener = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

pub struct EventBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        })
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback. It stays registered until
    /// [`Subscription::unsubscribe`] is called or the bus is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.listeners().push((id, listener));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Receiver for every event emitted from now on.
    pub fn channel(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Deliver `event` to every callback, then to channel receivers.
    ///
    /// Returns how many listeners of either kind were reached.
    pub fn emit(&self, event: &DomainEvent) -> usize {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking.
        let snapshot: Vec<Listener> = self.listeners().iter().map(|(_, l)| Arc::clone(l)).collect();

        let mut delivered = 0;
        for listener in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => log::error!("Event listener panicked while handling {}", event.type_name()),
            }
        }

        delivered + self.sender.send(event.clone()).unwrap_or(0)
    }

    /// Number of registered callbacks plus live channel receivers.
    pub fn subscriber_count(&self) -> usize {
        self.listeners().len() + self.sender.receiver_count()
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

/// Handle for a registered callback.
///
/// Dropping it does not unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Subscription {
    /// Remove the callback. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, UNKNOWN_SESSION};
    use chrono::Utc;

    fn event(thread_id: &str) -> DomainEvent {
        DomainEvent::new(
            UNKNOWN_SESSION,
            Utc::now(),
            EventPayload::ThreadStarted {
                thread_id: thread_id.to_string(),
            },
        )
    }

    fn recorder(bus: &Arc<EventBus>, tag: &'static str, seen: &Arc<Mutex<Vec<String>>>) -> Subscription {
        let seen = Arc::clone(seen);
        bus.subscribe(move |e| {
            if let EventPayload::ThreadStarted { thread_id } = &e.payload {
                seen.lock().unwrap().push(format!("{}:{}", tag, thread_id));
            }
        })
    }

    #[test]
    fn new_bus_has_no_subscribers() {
        assert_eq!(EventBus::new().subscriber_count(), 0);
        assert_eq!(EventBus::new().emit(&event("t")), 0);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _a = recorder(&bus, "a", &seen);
        let _b = recorder(&bus, "b", &seen);

        assert_eq!(bus.emit(&event("t1")), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a:t1", "b:t1"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _bad = bus.subscribe(|_| panic!("listener failure"));
        let _good = recorder(&bus, "good", &seen);

        assert_eq!(bus.emit(&event("t1")), 1);
        assert_eq!(bus.emit(&event("t2")), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["good:t1", "good:t2"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = recorder(&bus, "a", &seen);
        bus.emit(&event("t1"));

        assert!(sub.unsubscribe());
        bus.emit(&event("t2"));
        assert_eq!(*seen.lock().unwrap(), vec!["a:t1"]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropping_subscription_keeps_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        drop(recorder(&bus, "a", &seen));
        bus.emit(&event("t1"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_false() {
        let bus = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn listener_may_subscribe_during_emit() {
        let bus = EventBus::new();
        let inner = Arc::clone(&bus);
        let _sub = bus.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });
        bus.emit(&event("t"));
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn channel_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.channel();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(&event("t1"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.type_name(), "thread.started");
    }

    #[tokio::test]
    async fn dropped_receiver_decrements_count() {
        let bus = EventBus::new();
        let rx = bus.channel();
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
