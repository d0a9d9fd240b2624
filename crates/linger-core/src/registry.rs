//! Channel registry and publish API.
//!
//! The registry maps channel names to their [`Dispatcher`]. Lookups and
//! creation go through a sharded concurrent map, so unrelated channels never
//! contend on a shared lock; each dispatcher serializes its own listeners.

use crate::dispatcher::{validate_channel_name, ChannelId, ChannelOptions, Dispatcher};
use crate::error::{LongPollError, Result};
use crate::payload::Payload;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Log every registration and delivery at `debug` level.
    pub debug: bool,
    /// Maximum number of channels (0 = unbounded).
    pub max_channels: usize,
}

/// Registry of long-poll channels.
///
/// A registry is an ordinary value: create one at startup and share it
/// (typically behind an [`Arc`]) with the request handlers and publishers.
#[derive(Debug)]
pub struct Registry {
    /// Dispatchers indexed by channel name.
    channels: DashMap<ChannelId, Arc<Dispatcher>>,
    /// Configuration.
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating long-poll registry with config: {:?}", config);
        Self {
            channels: DashMap::new(),
            config,
        }
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a channel.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::DuplicateChannel`] if the name is taken,
    /// [`LongPollError::InvalidChannel`] if it is malformed, and
    /// [`LongPollError::TooManyChannels`] if `max_channels` is reached.
    pub fn create_channel(
        &self,
        name: &str,
        options: ChannelOptions,
    ) -> Result<Arc<Dispatcher>> {
        validate_channel_name(name).map_err(LongPollError::InvalidChannel)?;

        let max = self.config.max_channels;
        if max > 0 && self.channels.len() >= max && !self.channels.contains_key(name) {
            warn!(channel = %name, max, "Channel limit reached");
            return Err(LongPollError::TooManyChannels(max));
        }

        match self.channels.entry(name.to_string()) {
            Entry::Occupied(_) => {
                warn!(channel = %name, "Channel already exists");
                Err(LongPollError::DuplicateChannel(name.to_string()))
            }
            Entry::Vacant(slot) => {
                let dispatcher =
                    Arc::new(Dispatcher::with_options(name, options).verbose(self.config.debug));
                slot.insert(Arc::clone(&dispatcher));
                debug!(
                    channel = %name,
                    max_pending_listeners = options.max_pending_listeners,
                    "Created channel"
                );
                Ok(dispatcher)
            }
        }
    }

    /// Look up the dispatcher for a channel.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<Dispatcher>> {
        self.channels.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, name: &str) -> Result<Arc<Dispatcher>> {
        self.lookup(name).ok_or_else(|| {
            warn!(channel = %name, "Channel does not exist");
            LongPollError::ChannelNotFound(name.to_string())
        })
    }

    /// Deliver a payload to every broadcast listener waiting on a channel.
    ///
    /// Returns the number of listeners that received it; zero is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::ChannelNotFound`] if the channel was never created.
    pub fn publish(&self, name: &str, payload: impl Into<Payload>) -> Result<usize> {
        let dispatcher = self.require(name)?;
        Ok(dispatcher.fire_all(&payload.into()))
    }

    /// Deliver a payload to the listener waiting under a subscriber ID.
    ///
    /// Returns `false` if nobody with that ID is currently waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LongPollError::ChannelNotFound`] if the channel was never created.
    pub fn publish_to_id(
        &self,
        name: &str,
        subscriber: &str,
        payload: impl Into<Payload>,
    ) -> Result<bool> {
        let dispatcher = self.require(name)?;
        Ok(dispatcher.fire_for_id(subscriber, &payload.into()))
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.channels
            .iter()
            .fold(RegistryStats::default(), |mut acc, entry| {
                let s = entry.value().stats();
                acc.channel_count += 1;
                acc.pending_broadcast += s.pending_broadcast;
                acc.pending_ids += s.pending_ids;
                acc.delivered_total += s.delivered_total;
                acc.superseded_total += s.superseded_total;
                acc
            })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of channels.
    pub channel_count: usize,
    /// Broadcast listeners waiting across all channels.
    pub pending_broadcast: usize,
    /// ID-scoped listeners waiting across all channels.
    pub pending_ids: usize,
    /// Callbacks invoked across all channels.
    pub delivered_total: u64,
    /// Superseded ID-scoped listeners across all channels.
    pub superseded_total: u64,
}
