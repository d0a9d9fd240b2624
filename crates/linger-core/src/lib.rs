//! # linger-core
//!
//! Long-poll dispatch for the Linger server.
//!
//! Requests arrive, wait on a named channel, and are completed exactly once
//! when something is published to that channel, either by broadcast or
//! addressed to the subscriber ID the request waits under.
//!
//! - **Registry** - Channel name to dispatcher mapping, and the publish API
//! - **Dispatcher** - Pending listeners of one channel, one-shot delivery
//! - **Hooks** - Ordered pre-registration checks that assign subscriber IDs
//! - **LongPoll** - Registration façade used by request handlers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Request   │────▶│  LongPoll   │────▶│ Dispatcher  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   ▲
//!                            ▼                   │
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  HookChain  │     │  Registry   │◀── publish
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tenvis_linger_core::{ChannelOptions, LongPoll, RegistryConfig, RequestContext};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tenvis_linger_core::LongPollError> {
//! let longpoll = LongPoll::with_config(RegistryConfig::default());
//! longpoll.create("/events", ChannelOptions::default())?;
//!
//! let held = longpoll.hold("/events", &RequestContext::new("/events")).await?;
//! assert_eq!(longpoll.publish("/events", "hello")?, 1);
//! assert_eq!(held.wait().await.unwrap().as_value(), "hello");
//! # Ok(())
//! # }
//! ```

/// Emit a per-operation event at `debug` when verbose, otherwise at `trace`.
macro_rules! op_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            ::tracing::debug!($($arg)+)
        } else {
            ::tracing::trace!($($arg)+)
        }
    };
}
pub(crate) use op_event;

pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod hooks;
pub mod listener;
pub mod payload;
pub mod registry;

pub use dispatcher::{ChannelId, ChannelOptions, Dispatcher, DispatcherStats};
pub use error::LongPollError;
pub use facade::{Held, LongPoll, Registration};
pub use hooks::{HookChain, PreRegistrationHook, Rejection, RequestContext, Verdict};
pub use listener::{Completion, Listener, ListenerId, SubscriberId};
pub use payload::Payload;
pub use registry::{Registry, RegistryConfig, RegistryStats};
