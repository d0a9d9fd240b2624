//! Error types for Linger.

use thiserror::Error;

/// Errors reported by the registry, dispatchers and the registration façade.
///
/// None of these are retried internally; the caller decides what to do.
#[derive(Debug, Error)]
pub enum LongPollError {
    /// A channel with this name already exists.
    #[error("URL already in use: {0}")]
    DuplicateChannel(String),

    /// No channel was created under this name.
    #[error("Channel does not exist: {0}")]
    ChannelNotFound(String),

    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Maximum number of channels reached.
    #[error("Maximum number of channels reached ({0})")]
    TooManyChannels(usize),

    /// The channel already holds its maximum number of pending listeners.
    #[error("Channel {channel} is at capacity ({limit} pending listeners)")]
    CapacityExceeded {
        /// Channel name.
        channel: String,
        /// Configured `max_pending_listeners`.
        limit: usize,
    },

    /// A pre-registration hook aborted the request.
    #[error("Request rejected ({status}): {reason}")]
    Rejected {
        /// HTTP-like status code suggested by the hook.
        status: u16,
        /// Human readable reason.
        reason: String,
    },

    /// A value could not be turned into a payload.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LongPollError {
    /// Suggested HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::DuplicateChannel(_) => 409,
            Self::ChannelNotFound(_) => 404,
            Self::InvalidChannel(_) | Self::Serialization(_) => 400,
            Self::TooManyChannels(_) | Self::CapacityExceeded { .. } => 503,
            Self::Rejected { status, .. } => *status,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = LongPollError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LongPollError::DuplicateChannel("/test".into());
        assert!(err.to_string().contains("URL already in use"));

        let err = LongPollError::ChannelNotFound("/nonexistent".into());
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(LongPollError::ChannelNotFound("/x".into()).status_code(), 404);
        assert_eq!(
            LongPollError::CapacityExceeded {
                channel: "/x".into(),
                limit: 1
            }
            .status_code(),
            503
        );
        assert_eq!(
            LongPollError::Rejected {
                status: 401,
                reason: "nope".into()
            }
            .status_code(),
            401
        );
    }
}
