//! HTTP handlers for the Linger server.
//!
//! Every configured channel is served as a GET route whose pattern is also
//! the channel name, so `/poll/:id` is published to as `"/poll/:id"`.
//! A GET is held open until a publish completes it.

use crate::config::{ChannelConfig, Config};
use crate::cursors::{self, CursorBoard, CURSOR_CHANNEL};
use crate::metrics::{self, HeldRequestGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{MatchedPath, Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tenvis_linger_core::hooks::{BearerToken, HookChain, PathParamId, PreRegistrationHook, Verdict};
use tenvis_linger_core::{
    ChannelOptions, LongPoll, LongPollError, Registration, RegistryConfig, RequestContext,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Long-poll registry and façade.
    pub longpoll: LongPoll,
    /// Server configuration.
    pub config: Config,
    /// Cursor tracker state, when the demo is enabled.
    pub cursors: Option<CursorBoard>,
}

impl AppState {
    /// Create app state and the configured channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a configured
    /// channel cannot be created.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let mut longpoll = LongPoll::with_config(RegistryConfig {
            debug: config.longpoll.debug,
            max_channels: config.longpoll.max_channels,
        });

        if let Some(token) = &config.auth.token {
            longpoll.use_hook(BearerToken::new(token.clone()));
        }

        for channel in &config.channels {
            create_channel(&longpoll, channel)?;
        }

        let cursors = if config.demo.cursors {
            if !longpoll.registry().channel_exists(CURSOR_CHANNEL) {
                longpoll
                    .create(CURSOR_CHANNEL, ChannelOptions::default())
                    .context("Failed to create cursor channel")?;
            }
            Some(CursorBoard::new())
        } else {
            None
        };

        metrics::set_active_channels(longpoll.registry().stats().channel_count);

        Ok(Self {
            longpoll,
            config,
            cursors,
        })
    }

    /// Check the bearer token for non-poll routes.
    pub(crate) async fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let Some(token) = &self.config.auth.token else {
            return Ok(());
        };
        let ctx = context_headers(RequestContext::new("/publish"), headers);
        match BearerToken::new(token.clone()).check(&ctx).await {
            Verdict::Abort(rejection) => Err(error_body(rejection.status, &rejection.reason)),
            _ => Ok(()),
        }
    }
}

fn create_channel(longpoll: &LongPoll, channel: &ChannelConfig) -> Result<()> {
    let mut hooks = HookChain::new();
    if let Some(param) = &channel.id_param {
        hooks.push(PathParamId::new(param.clone()));
    }
    let options = ChannelOptions::with_max_pending_listeners(channel.max_pending_listeners);

    longpoll
        .create_with_hooks(&channel.path, hooks, options)
        .with_context(|| format!("Failed to create channel {}", channel.path))?;
    info!(
        channel = %channel.path,
        by_id = channel.id_param.is_some(),
        max_pending_listeners = channel.max_pending_listeners,
        "Long-poll endpoint ready"
    );
    Ok(())
}

/// Build the HTTP router for the given state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/publish", post(publish_handler))
        .route("/health", get(health_handler));

    for channel in state.longpoll.registry().channel_names() {
        app = app.route(&channel, get(poll_handler));
    }

    if state.cursors.is_some() {
        app = app
            .route("/api/cursor", post(cursors::update_cursor))
            .route("/api/cursors", get(cursors::list_cursors));
    }

    app.with_state(state)
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    if state.cursors.is_some() {
        let timeout = std::time::Duration::from_millis(config.demo.cursor_timeout_ms);
        cursors::spawn_pruner(Arc::clone(&state), timeout);
        info!("Cursor tracker demo enabled, events on {}", CURSOR_CHANNEL);
    }

    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(addr).await?;
    info!("Linger server listening on {}", addr);
    for channel in state.longpoll.registry().channel_names() {
        info!("Long-poll endpoint: http://{}{}", addr, channel);
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.longpoll.registry().stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channel_count,
        "pending": stats.pending_broadcast + stats.pending_ids,
    }))
}

fn context_headers(mut ctx: RequestContext, headers: &HeaderMap) -> RequestContext {
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            ctx = ctx.with_header(name.as_str(), value);
        }
    }
    ctx
}

fn error_body(status: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": message }))).into_response()
}

fn error_response(err: &LongPollError) -> Response {
    error_body(err.status_code(), &err.to_string())
}

/// Hold a GET on a channel until something is published to it.
async fn poll_handler(
    State(state): State<Arc<AppState>>,
    matched: MatchedPath,
    params: Option<Path<HashMap<String, String>>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut ctx = RequestContext::new(uri.path());
    if let Some(Path(params)) = params {
        ctx.params = params;
    }
    let ctx = context_headers(ctx, &headers);

    hold_request(state, matched.as_str(), ctx).await
}

/// Register a held request on `channel` and answer it once it completes:
/// `200` with the payload, `409` if superseded, `204` on hold timeout, or
/// the registration error's status.
async fn hold_request(state: Arc<AppState>, channel: &str, ctx: RequestContext) -> Response {
    let held = match state.longpoll.hold(channel, &ctx).await {
        Ok(held) => held,
        Err(e) => {
            debug!(channel = %channel, error = %e, "Long-poll registration failed");
            metrics::record_error("registration");
            return error_response(&e);
        }
    };

    let kind = match held.registration() {
        Registration::Broadcast { .. } => "broadcast",
        Registration::Subscriber { .. } => "subscriber",
    };
    metrics::record_registration(kind);

    let _guard = HeldRequestGuard::new();
    let started = Instant::now();

    let outcome = match state.config.longpoll.poll_timeout() {
        Some(limit) => tokio::time::timeout(limit, held.wait()).await.ok(),
        None => Some(held.wait().await),
    };

    match outcome {
        Some(Some(payload)) => {
            metrics::record_hold(started.elapsed(), "delivered");
            Json(payload).into_response()
        }
        Some(None) => {
            metrics::record_hold(started.elapsed(), "superseded");
            debug!(channel = %channel, "Held request superseded");
            error_body(
                StatusCode::CONFLICT.as_u16(),
                "superseded by a newer request",
            )
        }
        None => {
            metrics::record_hold(started.elapsed(), "timeout");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Body of `POST /publish`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Channel name, i.e. the route pattern.
    pub channel: String,
    /// Subscriber ID; broadcast when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Payload delivered to the held requests.
    #[serde(default)]
    pub data: Value,
}

/// Publish to a channel, optionally addressed to one subscriber.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Response {
    if let Err(response) = state.authorize(&headers).await {
        return response;
    }

    let result = match &request.id {
        Some(id) => state
            .longpoll
            .publish_to_id(&request.channel, id, request.data)
            .map(|delivered| {
                metrics::record_publish("subscriber", usize::from(delivered));
                json!({ "delivered": delivered })
            }),
        None => state
            .longpoll
            .publish(&request.channel, request.data)
            .map(|delivered| {
                metrics::record_publish("broadcast", delivered);
                json!({ "delivered": delivered })
            }),
    };

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            warn!(channel = %request.channel, error = %e, "Publish failed");
            metrics::record_error("publish");
            error_response(&e)
        }
    }
}
