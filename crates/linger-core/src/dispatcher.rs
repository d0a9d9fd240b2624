//! Channel dispatcher.
//!
//! Each channel owns one dispatcher holding the listeners currently waiting on
//! it: anonymous broadcast listeners, and listeners scoped to a subscriber ID.
//! All state changes happen under a single per-channel lock; callbacks are
//! detached under the lock and invoked after it is released, so a callback
//! may publish again without deadlocking or double-firing.

use crate::error::{LongPollError, Result};
use crate::listener::{Listener, ListenerId, SubscriberId};
use crate::payload::Payload;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Options applied when a channel is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Maximum number of pending broadcast listeners (0 = unbounded).
    pub max_pending_listeners: usize,
}

impl ChannelOptions {
    /// Options with a pending-listener limit.
    #[must_use]
    pub fn with_max_pending_listeners(max: usize) -> Self {
        Self {
            max_pending_listeners: max,
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    broadcast: Vec<Listener>,
    by_id: HashMap<SubscriberId, Listener>,
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Broadcast listeners currently waiting.
    pub pending_broadcast: usize,
    /// ID-scoped listeners currently waiting.
    pub pending_ids: usize,
    /// Callbacks invoked since creation.
    pub delivered_total: u64,
    /// ID-scoped listeners discarded by a newer registration.
    pub superseded_total: u64,
}

/// Holds the pending listeners of one channel and performs one-shot delivery.
#[derive(Debug)]
pub struct Dispatcher {
    name: ChannelId,
    options: ChannelOptions,
    verbose: bool,
    pending: Mutex<Pending>,
    delivered: AtomicU64,
    superseded: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with default options.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self::with_options(name, ChannelOptions::default())
    }

    /// Create a dispatcher with specific options.
    #[must_use]
    pub fn with_options(name: impl Into<ChannelId>, options: ChannelOptions) -> Self {
        Self {
            name: name.into(),
            options,
            verbose: false,
            pending: Mutex::new(Pending::default()),
            delivered: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
        }
    }

    /// Log every register/fire at `debug` instead of `trace`.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Whether register/fire events are logged at `debug`.
    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the options this channel was created with.
    #[must_use]
    pub fn options(&self) -> ChannelOptions {
        self.options
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // Callbacks never run under this lock, so a poisoned guard still
        // holds consistent state.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an anonymous listener fired by the next [`fire_all`](Self::fire_all).
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::CapacityExceeded`] if the channel already
    /// holds `max_pending_listeners` broadcast listeners.
    pub fn register_broadcast(
        &self,
        complete: impl FnOnce(Payload) + Send + 'static,
    ) -> Result<ListenerId> {
        let listener = Listener::new(complete);
        let id = listener.id();
        let limit = self.options.max_pending_listeners;

        let mut pending = self.lock();
        if limit > 0 && pending.broadcast.len() >= limit {
            drop(pending);
            tracing::warn!(channel = %self.name, limit, "Broadcast registration rejected, channel at capacity");
            return Err(LongPollError::CapacityExceeded {
                channel: self.name.clone(),
                limit,
            });
        }
        pending.broadcast.push(listener);
        let waiting = pending.broadcast.len();
        drop(pending);

        crate::op_event!(self.verbose, channel = %self.name, listener = id, waiting, "Broadcast listener registered");
        Ok(id)
    }

    /// Register a listener for a subscriber ID.
    ///
    /// A listener already pending for the same ID is dropped without being
    /// invoked; only the newest registration stays live.
    pub fn register_for_id(
        &self,
        subscriber: impl Into<SubscriberId>,
        complete: impl FnOnce(Payload) + Send + 'static,
    ) -> ListenerId {
        let subscriber = subscriber.into();
        let listener = Listener::new(complete);
        let id = listener.id();

        let previous = self.lock().by_id.insert(subscriber.clone(), listener);

        if let Some(old) = previous {
            self.superseded.fetch_add(1, Ordering::Relaxed);
            crate::op_event!(
                self.verbose,
                channel = %self.name,
                subscriber = %subscriber,
                superseded = old.id(),
                listener = id,
                "Pending listener superseded"
            );
            drop(old);
        } else {
            crate::op_event!(self.verbose, channel = %self.name, subscriber = %subscriber, listener = id, "Subscriber listener registered");
        }
        id
    }

    /// Fire every pending broadcast listener once with `payload`.
    ///
    /// Returns the number of callbacks invoked. ID-scoped listeners are not
    /// affected.
    pub fn fire_all(&self, payload: &Payload) -> usize {
        let listeners = std::mem::take(&mut self.lock().broadcast);
        let count = listeners.len();

        for listener in listeners {
            listener.fire(payload.clone());
        }

        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
        crate::op_event!(self.verbose, channel = %self.name, recipients = count, "Broadcast fired");
        count
    }

    /// Fire the listener pending for `subscriber`, if any.
    ///
    /// Returns `true` if a callback was invoked.
    pub fn fire_for_id(&self, subscriber: &str, payload: &Payload) -> bool {
        let Some(listener) = self.lock().by_id.remove(subscriber) else {
            crate::op_event!(self.verbose, channel = %self.name, subscriber = %subscriber, "No pending listener for subscriber");
            return false;
        };

        let waited_ms = listener.waited().as_millis() as u64;
        listener.fire(payload.clone());
        self.delivered.fetch_add(1, Ordering::Relaxed);
        crate::op_event!(self.verbose, channel = %self.name, subscriber = %subscriber, waited_ms, "Subscriber listener fired");
        true
    }

    /// Number of pending broadcast listeners.
    #[must_use]
    pub fn pending_broadcast(&self) -> usize {
        self.lock().broadcast.len()
    }

    /// Subscriber IDs with a pending listener.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<SubscriberId> {
        self.lock().by_id.keys().cloned().collect()
    }

    /// Check if a subscriber has a pending listener.
    #[must_use]
    pub fn has_pending_id(&self, subscriber: &str) -> bool {
        self.lock().by_id.contains_key(subscriber)
    }

    /// Check if nothing is waiting on this channel.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let pending = self.lock();
        pending.broadcast.is_empty() && pending.by_id.is_empty()
    }

    /// Snapshot of this dispatcher's counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let (pending_broadcast, pending_ids) = {
            let pending = self.lock();
            (pending.broadcast.len(), pending.by_id.len())
        };
        DispatcherStats {
            pending_broadcast,
            pending_ids,
            delivered_total: self.delivered.load(Ordering::Relaxed),
            superseded_total: self.superseded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(Payload) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        (count, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("/poll").is_ok());
        assert!(validate_channel_name("/poll/:id").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("/with space").is_ok());
        assert!(validate_channel_name("/café").is_ok());
        assert!(validate_channel_name("/line\nbreak").is_err());
        assert!(validate_channel_name("/nul\0").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }

    #[test]
    fn test_broadcast_fires_once() {
        let dispatcher = Dispatcher::new("/poll");
        let (count, cb) = counter();
        dispatcher.register_broadcast(cb).unwrap();

        assert_eq!(dispatcher.fire_all(&Payload::from("POLL")), 1);
        assert_eq!(dispatcher.fire_all(&Payload::from("POLL")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broadcast_fan_out() {
        let dispatcher = Dispatcher::new("/poll");
        let received = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..5 {
            let sink = Arc::clone(&received);
            dispatcher
                .register_broadcast(move |p| sink.lock().unwrap().push(p))
                .unwrap();
        }

        let payload = Payload::new(json!({"text": "hi"}));
        assert_eq!(dispatcher.fire_all(&payload), 5);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 5);
        assert!(received.iter().all(|p| p == &payload));
    }

    #[test]
    fn test_id_supersession() {
        let dispatcher = Dispatcher::new("/poll/:id");
        let (first, cb1) = counter();
        let (second, cb2) = counter();

        dispatcher.register_for_id("u1", cb1);
        dispatcher.register_for_id("u1", cb2);
        assert_eq!(dispatcher.stats().superseded_total, 1);

        assert!(dispatcher.fire_for_id("u1", &Payload::null()));
        assert!(!dispatcher.fire_for_id("u1", &Payload::null()));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_id_isolation() {
        let dispatcher = Dispatcher::new("/poll/:id");
        let (u1, cb1) = counter();
        let (u2, cb2) = counter();
        let (anon, cb3) = counter();

        dispatcher.register_for_id("u1", cb1);
        dispatcher.register_for_id("u2", cb2);
        dispatcher.register_broadcast(cb3).unwrap();

        assert!(dispatcher.fire_for_id("u1", &Payload::from("private")));
        assert_eq!(u1.load(Ordering::SeqCst), 1);
        assert_eq!(u2.load(Ordering::SeqCst), 0);
        assert_eq!(anon.load(Ordering::SeqCst), 0);
        assert!(dispatcher.has_pending_id("u2"));
        assert_eq!(dispatcher.pending_broadcast(), 1);
    }

    #[test]
    fn test_fire_all_leaves_id_listeners() {
        let dispatcher = Dispatcher::new("/poll/:id");
        let (u1, cb) = counter();
        dispatcher.register_for_id("u1", cb);

        assert_eq!(dispatcher.fire_all(&Payload::null()), 0);
        assert_eq!(u1.load(Ordering::SeqCst), 0);
        assert!(dispatcher.has_pending_id("u1"));
    }

    #[test]
    fn test_capacity_exceeded() {
        let dispatcher =
            Dispatcher::with_options("/limited", ChannelOptions::with_max_pending_listeners(2));
        dispatcher.register_broadcast(|_| {}).unwrap();
        dispatcher.register_broadcast(|_| {}).unwrap();

        assert!(matches!(
            dispatcher.register_broadcast(|_| {}),
            Err(LongPollError::CapacityExceeded { limit: 2, .. })
        ));

        // Publishing drains the set and frees capacity again.
        assert_eq!(dispatcher.fire_all(&Payload::null()), 2);
        assert!(dispatcher.register_broadcast(|_| {}).is_ok());
    }

    #[test]
    fn test_capacity_holds_under_contention() {
        let threads = 32;
        let limit = 5;

        for _ in 0..50 {
            let dispatcher = Dispatcher::with_options(
                "/limited",
                ChannelOptions::with_max_pending_listeners(limit),
            );
            let accepted = AtomicUsize::new(0);
            let barrier = std::sync::Barrier::new(threads);

            std::thread::scope(|s| {
                for _ in 0..threads {
                    s.spawn(|| {
                        barrier.wait();
                        if dispatcher.register_broadcast(|_| {}).is_ok() {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });

            assert_eq!(accepted.load(Ordering::SeqCst), limit);
            assert_eq!(dispatcher.pending_broadcast(), limit);
        }
    }

    #[test]
    fn test_reentrant_publish_does_not_refire() {
        let dispatcher = Arc::new(Dispatcher::new("/poll"));
        let (count, cb) = counter();
        dispatcher.register_broadcast(cb).unwrap();

        let inner = Arc::clone(&dispatcher);
        let nested = Arc::new(AtomicUsize::new(usize::MAX));
        let nested_result = Arc::clone(&nested);
        dispatcher
            .register_broadcast(move |p| {
                nested_result.store(inner.fire_all(&p), Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(dispatcher.fire_all(&Payload::from("x")), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(nested.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_register_then_fire() {
        let dispatcher = Arc::new(Dispatcher::new("/concurrent"));
        let count = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..10 {
                let dispatcher = Arc::clone(&dispatcher);
                let hits = Arc::clone(&count);
                s.spawn(move || {
                    dispatcher
                        .register_broadcast(move |_| {
                            hits.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                });
            }
        });

        assert_eq!(dispatcher.fire_all(&Payload::from("test-data")), 10);
        assert_eq!(dispatcher.fire_all(&Payload::from("test-data")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_concurrent_register_and_fire_for_id() {
        // Every registration either fires exactly once or is superseded.
        let dispatcher = Arc::new(Dispatcher::new("/race/:id"));
        let fired = Arc::new(AtomicUsize::new(0));
        let rounds = 200;

        std::thread::scope(|s| {
            let registrar = Arc::clone(&dispatcher);
            let hits = Arc::clone(&fired);
            s.spawn(move || {
                for _ in 0..rounds {
                    let hits = Arc::clone(&hits);
                    registrar.register_for_id("u1", move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });

            let publisher = Arc::clone(&dispatcher);
            s.spawn(move || {
                for _ in 0..rounds {
                    publisher.fire_for_id("u1", &Payload::null());
                }
            });
        });

        let leftover = usize::from(dispatcher.has_pending_id("u1"));
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered_total as usize, fired.load(Ordering::SeqCst));
        assert_eq!(
            fired.load(Ordering::SeqCst) + stats.superseded_total as usize + leftover,
            rounds
        );
    }
}
