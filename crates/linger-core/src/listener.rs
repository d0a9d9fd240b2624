//! One-shot listeners.
//!
//! A [`Listener`] wraps the completion callback of a single held request.
//! Firing consumes the listener, so a callback can never run twice.

use crate::payload::Payload;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Completion callback handed in by the request-handling side.
pub type Completion = Box<dyn FnOnce(Payload) + Send + 'static>;

/// A unique listener identifier.
pub type ListenerId = u64;

static LISTENER_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    LISTENER_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Opaque identifier of a specific waiting client within a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Create a subscriber ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SubscriberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::borrow::Borrow<str> for SubscriberId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A pending one-shot listener.
pub struct Listener {
    id: ListenerId,
    registered_at: Instant,
    complete: Completion,
}

impl Listener {
    /// Wrap a completion callback.
    pub fn new(complete: impl FnOnce(Payload) + Send + 'static) -> Self {
        Self {
            id: next_listener_id(),
            registered_at: Instant::now(),
            complete: Box::new(complete),
        }
    }

    /// Listener identifier.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// How long this listener has been waiting.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Invoke the completion callback, consuming the listener.
    pub fn fire(self, payload: Payload) {
        (self.complete)(payload);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("waited", &self.waited())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_listener_fires_with_payload() {
        let received = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&received);
        let listener = Listener::new(move |payload| {
            *slot.lock().unwrap() = Some(payload);
        });

        listener.fire(Payload::new(json!({"a": 1})));
        let got = received.lock().unwrap().take().unwrap();
        assert_eq!(got.as_value(), &json!({"a": 1}));
    }

    #[test]
    fn test_listener_ids_unique() {
        let a = Listener::new(|_| {});
        let b = Listener::new(|_| {});
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_subscriber_id_conversions() {
        let id: SubscriberId = "user123".into();
        assert_eq!(id.as_str(), "user123");
        assert_eq!(id.to_string(), "user123");
    }
}
