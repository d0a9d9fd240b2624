//! Listener registration façade.
//!
//! [`LongPoll`] is what the request-handling side talks to. It owns the
//! hook chains, turns each incoming request into a broadcast or
//! subscriber-scoped registration, and forwards publishes to the registry.

use crate::dispatcher::{ChannelId, ChannelOptions, Dispatcher};
use crate::error::{LongPollError, Result};
use crate::hooks::{HookChain, PreRegistrationHook, Rejection, RequestContext};
use crate::listener::{ListenerId, SubscriberId};
use crate::payload::Payload;
use crate::registry::{Registry, RegistryConfig};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How a request was registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Waiting for the next broadcast.
    Broadcast {
        /// Listener identifier.
        listener: ListenerId,
    },
    /// Waiting for a publish to this subscriber ID.
    Subscriber {
        /// Subscriber ID assigned by the hooks.
        id: SubscriberId,
        /// Listener identifier.
        listener: ListenerId,
    },
}

impl Registration {
    /// The subscriber ID, for subscriber-scoped registrations.
    #[must_use]
    pub fn subscriber(&self) -> Option<&SubscriberId> {
        match self {
            Self::Broadcast { .. } => None,
            Self::Subscriber { id, .. } => Some(id),
        }
    }

    /// The listener identifier.
    #[must_use]
    pub fn listener(&self) -> ListenerId {
        match self {
            Self::Broadcast { listener } | Self::Subscriber { listener, .. } => *listener,
        }
    }
}

/// A registered request waiting for its payload. See [`LongPoll::hold`].
#[derive(Debug)]
pub struct Held {
    registration: Registration,
    receiver: oneshot::Receiver<Payload>,
}

impl Held {
    /// How the request was registered.
    #[must_use]
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Wait for the payload.
    ///
    /// Returns `None` if the listener was dropped without firing, which
    /// happens when a newer request for the same subscriber ID superseded it.
    pub async fn wait(self) -> Option<Payload> {
        self.receiver.await.ok()
    }
}

/// Entry point for long-poll registration and publishing.
#[derive(Debug)]
pub struct LongPoll {
    registry: Arc<Registry>,
    hooks: HookChain,
    channel_hooks: DashMap<ChannelId, HookChain>,
}

impl LongPoll {
    /// Create a façade over an existing registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            hooks: HookChain::new(),
            channel_hooks: DashMap::new(),
        }
    }

    /// Create a façade with its own registry.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::new(Arc::new(Registry::with_config(config)))
    }

    /// Add a hook that runs for every channel, before the channel's own hooks.
    pub fn use_hook(&mut self, hook: impl PreRegistrationHook + 'static) {
        self.hooks.push(hook);
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Create a channel without channel-specific hooks.
    ///
    /// # Errors
    ///
    /// See [`Registry::create_channel`].
    pub fn create(&self, name: &str, options: ChannelOptions) -> Result<Arc<Dispatcher>> {
        self.create_with_hooks(name, HookChain::new(), options)
    }

    /// Create a channel whose requests pass through `hooks` before registering.
    ///
    /// # Errors
    ///
    /// See [`Registry::create_channel`].
    pub fn create_with_hooks(
        &self,
        name: &str,
        hooks: HookChain,
        options: ChannelOptions,
    ) -> Result<Arc<Dispatcher>> {
        // The hook slot stays locked until the chain is in place, so a request
        // that already sees the dispatcher also sees its hooks.
        match self.channel_hooks.entry(name.to_string()) {
            Entry::Occupied(_) => Err(LongPollError::DuplicateChannel(name.to_string())),
            Entry::Vacant(slot) => {
                let dispatcher = self.registry.create_channel(name, options)?;
                debug!(channel = %name, hooks = hooks.len(), "Long-poll endpoint created");
                slot.insert(hooks);
                Ok(dispatcher)
            }
        }
    }

    /// Register an incoming long-poll request.
    ///
    /// Runs the façade-wide hooks, then the channel's hooks. If they assigned
    /// a subscriber ID the request waits under it, replacing any earlier
    /// request with the same ID; otherwise it waits for the next broadcast.
    /// `complete` is invoked at most once, with the delivered payload.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::ChannelNotFound`] for unknown channels,
    /// [`LongPollError::Rejected`] if a hook aborted, and
    /// [`LongPollError::CapacityExceeded`] if the channel is full.
    pub async fn on_incoming_request(
        &self,
        channel: &str,
        ctx: &RequestContext,
        complete: impl FnOnce(Payload) + Send + 'static,
    ) -> Result<Registration> {
        let dispatcher = self.registry.lookup(channel).ok_or_else(|| {
            warn!(channel = %channel, path = %ctx.path, "Request for unknown channel");
            LongPollError::ChannelNotFound(channel.to_string())
        })?;
        let channel_hooks = self
            .channel_hooks
            .get(channel)
            .map(|chain| chain.clone())
            .unwrap_or_default();

        let subscriber = self.hooks.resolve(ctx, None).await.map_err(rejected)?;
        let subscriber = channel_hooks
            .resolve(ctx, subscriber)
            .await
            .map_err(rejected)?;

        match subscriber {
            Some(id) => {
                let listener = dispatcher.register_for_id(id.clone(), complete);
                Ok(Registration::Subscriber { id, listener })
            }
            None => {
                let listener = dispatcher.register_broadcast(complete)?;
                Ok(Registration::Broadcast { listener })
            }
        }
    }

    /// Register a request and get a handle that resolves with its payload.
    ///
    /// # Errors
    ///
    /// Same as [`on_incoming_request`](Self::on_incoming_request).
    pub async fn hold(&self, channel: &str, ctx: &RequestContext) -> Result<Held> {
        let (tx, receiver) = oneshot::channel();
        let registration = self
            .on_incoming_request(channel, ctx, move |payload| {
                // The waiting side may already be gone.
                let _ = tx.send(payload);
            })
            .await?;
        Ok(Held {
            registration,
            receiver,
        })
    }

    /// Deliver a payload to every broadcast listener on a channel.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::ChannelNotFound`] for unknown channels.
    pub fn publish(&self, channel: &str, payload: impl Into<Payload>) -> Result<usize> {
        self.registry.publish(channel, payload)
    }

    /// Deliver a payload to the listener waiting under `subscriber`.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::ChannelNotFound`] for unknown channels.
    pub fn publish_to_id(
        &self,
        channel: &str,
        subscriber: &str,
        payload: impl Into<Payload>,
    ) -> Result<bool> {
        self.registry.publish_to_id(channel, subscriber, payload)
    }

    /// Serialize `data` and broadcast it.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::Serialization`] or
    /// [`LongPollError::ChannelNotFound`].
    pub fn publish_serialized<T: Serialize + ?Sized>(&self, channel: &str, data: &T) -> Result<usize> {
        self.publish(channel, Payload::from_serializable(data)?)
    }
}

fn rejected(rejection: Rejection) -> LongPollError {
    LongPollError::Rejected {
        status: rejection.status,
        reason: rejection.reason,
    }
}
