//! Payload type delivered to held requests.
//!
//! A payload is any JSON value. It is shared behind an [`Arc`] so that a
//! broadcast to many listeners hands out cheap clones of the same value.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// An immutable JSON payload.
#[derive(Clone, PartialEq)]
pub struct Payload(Arc<Value>);

impl Payload {
    /// Wrap a JSON value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// The JSON `null` payload.
    #[must_use]
    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    /// Serialize any value into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::Serialization`](crate::LongPollError::Serialization)
    /// if the value cannot be represented as JSON.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Borrow the inner value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the inner value, cloning only if other holders remain.
    #[must_use]
    pub fn into_value(self) -> Value {
        Arc::try_unwrap(self.0).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Number of live handles to this payload.
    #[must_use]
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.0)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::new(Value::String(s.to_string()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::new(Value::String(s))
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shares_value() {
        let payload = Payload::new(json!({"key": "value"}));
        let copy = payload.clone();
        assert_eq!(payload.share_count(), 2);
        assert_eq!(copy.as_value(), &json!({"key": "value"}));
    }

    #[test]
    fn test_payload_from_serializable() {
        #[derive(Serialize)]
        struct Update {
            text: &'static str,
        }

        let payload = Payload::from_serializable(&Update { text: "Hello" }).unwrap();
        assert_eq!(payload.into_value(), json!({"text": "Hello"}));
    }

    #[test]
    fn test_payload_serializes_transparently() {
        let payload = Payload::from(json!([1, 2, 3, "x"]));
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#"[1,2,3,"x"]"#);
        assert_eq!(serde_json::to_string(&Payload::null()).unwrap(), "null");
    }
}
