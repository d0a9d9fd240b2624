//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`linger.toml`, `/etc/linger/linger.toml`,
//!   `~/.config/linger/linger.toml`)
//! - Environment variables (`LINGER_*`, nested keys separated by `__`,
//!   e.g. `LINGER_LONGPOLL__DEBUG=true`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Routes served by the server itself, unavailable as channel paths.
pub const RESERVED_PATHS: &[&str] = &["/health", "/publish", "/api/cursor", "/api/cursors"];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Long-poll registry settings.
    #[serde(default)]
    pub longpoll: LongPollConfig,

    /// Channels created at startup. Each one is served as a GET route.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,

    /// Access control.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Demo applications.
    #[serde(default)]
    pub demo: DemoConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Long-poll registry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LongPollConfig {
    /// Log every registration and delivery.
    #[serde(default)]
    pub debug: bool,

    /// Maximum number of channels (0 = unbounded).
    #[serde(default)]
    pub max_channels: usize,

    /// Answer a held request with `204 No Content` after this long
    /// (0 = hold until published).
    #[serde(default)]
    pub poll_timeout_ms: u64,
}

impl LongPollConfig {
    /// The hold timeout, if one is configured.
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Duration> {
        (self.poll_timeout_ms > 0).then(|| Duration::from_millis(self.poll_timeout_ms))
    }
}

/// A channel served at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Route path, also used as the channel name (e.g. `/poll/:id`).
    pub path: String,

    /// Maximum pending broadcast listeners (0 = unbounded).
    #[serde(default)]
    pub max_pending_listeners: usize,

    /// Route parameter holding the subscriber ID.
    #[serde(default)]
    pub id_param: Option<String>,
}

/// Access control configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// If set, poll and publish requests must send `Authorization: Bearer <token>`.
    #[serde(default)]
    pub token: Option<String>,
}

/// Demo configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Serve the collaborative cursor tracker on `/api/cursor(s)` and `/events`.
    #[serde(default)]
    pub cursors: bool,

    /// Drop cursors idle for longer than this.
    #[serde(default = "default_cursor_timeout")]
    pub cursor_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            path: "/poll".to_string(),
            max_pending_listeners: 0,
            id_param: None,
        },
        ChannelConfig {
            path: "/poll/:id".to_string(),
            max_pending_listeners: 0,
            id_param: Some("id".to_string()),
        },
    ]
}

fn default_cursor_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            longpoll: LongPollConfig::default(),
            channels: default_channels(),
            auth: AuthConfig::default(),
            demo: DemoConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            cursors: false,
            cursor_timeout_ms: default_cursor_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "linger.toml",
            "/etc/linger/linger.toml",
            "~/.config/linger/linger.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Self::build(None)
    }

    /// Load configuration from a specific file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("LINGER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let source = path.map_or_else(|| "environment".to_string(), |p| p.display().to_string());
        let config: Config = builder
            .build()
            .with_context(|| format!("Failed to read config: {source}"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {source}"))?;

        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel path is not routable, collides with a
    /// built-in route, or is declared twice, or if the address is invalid.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !channel.path.starts_with('/') {
                anyhow::bail!("Channel path must start with '/': {}", channel.path);
            }
            if RESERVED_PATHS.contains(&channel.path.as_str()) {
                anyhow::bail!("Channel path is reserved by the server: {}", channel.path);
            }
            if !seen.insert(channel.path.as_str()) {
                anyhow::bail!("Channel declared twice: {}", channel.path);
            }
        }
        self.bind_addr()?;
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(!config.longpoll.debug);
        assert!(config.longpoll.poll_timeout().is_none());
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[1].id_param.as_deref(), Some("id"));
        assert!(!config.demo.cursors);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [longpoll]
            debug = true
            poll_timeout_ms = 30000

            [[channels]]
            path = "/events"
            max_pending_listeners = 50

            [[channels]]
            path = "/user/:uid"
            id_param = "uid"

            [auth]
            token = "secret"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert!(config.longpoll.debug);
        assert_eq!(config.longpoll.poll_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].max_pending_listeners, 50);
        assert_eq!(config.channels[1].id_param.as_deref(), Some("uid"));
        assert_eq!(config.auth.token.as_deref(), Some("secret"));
        assert!(config.metrics.enabled);
    }

    fn with_channel(path: &str) -> Config {
        let mut config = Config::default();
        config.channels.push(ChannelConfig {
            path: path.to_string(),
            max_pending_listeners: 0,
            id_param: None,
        });
        config
    }

    #[test]
    fn test_channel_path_needs_leading_slash() {
        let err = with_channel("poll").validate().unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));
        assert!(with_channel("/feed").validate().is_ok());
    }

    #[test]
    fn test_reserved_channel_paths_rejected() {
        for path in ["/health", "/publish", "/api/cursor", "/api/cursors"] {
            let err = with_channel(path).validate().unwrap_err();
            assert!(err.to_string().contains("reserved"), "{path}: {err}");
        }
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let mut config = Config::default();
        config.channels.push(config.channels[0].clone());
        assert!(config.validate().is_err());
    }
}
