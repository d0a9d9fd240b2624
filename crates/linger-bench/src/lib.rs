//! Shared fixtures for the Linger benchmarks.

use tenvis_linger_core::{ChannelOptions, Registry};

/// A registry with `channels` channels named `/bench/<n>`.
#[must_use]
pub fn registry_with_channels(channels: usize) -> Registry {
    let registry = Registry::new();
    for i in 0..channels {
        registry
            .create_channel(&format!("/bench/{}", i), ChannelOptions::default())
            .expect("fresh channel names are unique");
    }
    registry
}

/// Register `count` no-op broadcast listeners on `channel`.
pub fn fill_broadcast(registry: &Registry, channel: &str, count: usize) {
    let dispatcher = registry
        .lookup(channel)
        .expect("channel created by the fixture");
    for _ in 0..count {
        dispatcher
            .register_broadcast(|_| {})
            .expect("unbounded channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures() {
        let registry = registry_with_channels(3);
        fill_broadcast(&registry, "/bench/0", 5);
        assert_eq!(registry.stats().channel_count, 3);
        assert_eq!(registry.stats().pending_broadcast, 5);
    }
}
