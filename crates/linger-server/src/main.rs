//! # Linger Server
//!
//! HTTP long-poll server built on `linger-core`.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (channels /poll and /poll/:id)
//! linger
//!
//! # Run with a config file in the working directory
//! cp linger.example.toml linger.toml && linger
//!
//! # Run with environment variables
//! LINGER_PORT=8080 LINGER_HOST=0.0.0.0 LINGER_DEMO__CURSORS=true linger
//! ```
//!
//! Hold a request and publish to it:
//!
//! ```bash
//! curl localhost:8080/poll &
//! curl -XPOST localhost:8080/publish -H 'content-type: application/json' \
//!      -d '{"channel": "/poll", "data": {"text": "Hello world"}}'
//! ```

mod config;
mod cursors;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linger=debug,tenvis_linger_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Linger server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
