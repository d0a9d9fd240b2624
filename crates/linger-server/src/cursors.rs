//! Collaborative cursor tracker demo.
//!
//! Clients post their pointer position to `/api/cursor`; every change is
//! broadcast on the `/events` long-poll channel as a `cursors_update`.
//! Cursors idle for longer than the configured timeout are pruned by a
//! background task, which broadcasts the shrunken set.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Channel the cursor updates are published on.
pub const CURSOR_CHANNEL: &str = "/events";

const DEFAULT_COLOR: &str = "#6366f1";
const DEFAULT_NAME: &str = "Anonymous";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A tracked cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub user_id: String,
    /// Horizontal position in percent (0-100).
    pub x: f64,
    /// Vertical position in percent (0-100).
    pub y: f64,
    pub color: String,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub last_update: u64,
}

/// Body of `POST /api/cursor`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub user_id: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub color: Option<String>,
    pub name: Option<String>,
}

/// All active cursors.
#[derive(Debug, Default)]
pub struct CursorBoard {
    cursors: DashMap<String, Cursor>,
}

impl CursorBoard {
    /// Create an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cursor. Returns `None` if the update lacks
    /// `userId`, `x` or `y`.
    pub fn upsert(&self, update: CursorUpdate) -> Option<Cursor> {
        let user_id = update.user_id.filter(|id| !id.is_empty())?;
        let cursor = Cursor {
            user_id: user_id.clone(),
            x: update.x?.clamp(0.0, 100.0),
            y: update.y?.clamp(0.0, 100.0),
            color: update.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            name: update.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            last_update: now_ms(),
        };
        self.cursors.insert(user_id, cursor.clone());
        Some(cursor)
    }

    /// All cursors, ordered by user ID.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Cursor> {
        let mut cursors: Vec<Cursor> = self.cursors.iter().map(|c| c.value().clone()).collect();
        cursors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        cursors
    }

    /// Number of active cursors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Check if no cursor is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Remove cursors not updated within `timeout` of `now_ms`.
    ///
    /// Returns the removed user IDs.
    pub fn prune_stale_at(&self, now_ms: u64, timeout: Duration) -> Vec<String> {
        let timeout_ms = timeout.as_millis() as u64;
        let mut removed = Vec::new();
        self.cursors.retain(|user_id, cursor| {
            let stale = now_ms.saturating_sub(cursor.last_update) > timeout_ms;
            if stale {
                removed.push(user_id.clone());
            }
            !stale
        });
        removed
    }

    /// Remove cursors not updated within `timeout`.
    pub fn prune_stale(&self, timeout: Duration) -> Vec<String> {
        self.prune_stale_at(now_ms(), timeout)
    }

    fn update_payload(&self) -> serde_json::Value {
        json!({
            "type": "cursors_update",
            "cursors": self.snapshot(),
        })
    }
}

fn broadcast(state: &AppState, board: &CursorBoard) {
    match state.longpoll.publish(CURSOR_CHANNEL, board.update_payload()) {
        Ok(delivered) => metrics::record_publish("broadcast", delivered),
        Err(e) => {
            warn!(error = %e, "Failed to publish cursor update");
            metrics::record_error("cursor_publish");
        }
    }
}

/// `POST /api/cursor`
pub async fn update_cursor(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<CursorUpdate>,
) -> impl IntoResponse {
    if let Err(response) = state.authorize(&headers).await {
        return response;
    }

    let Some(board) = state.cursors.as_ref() else {
        return (StatusCode::NOT_FOUND, Json(json!({"success": false}))).into_response();
    };

    if board.upsert(update).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "userId, x, and y are required",
            })),
        )
            .into_response();
    }

    broadcast(&state, board);

    Json(json!({
        "success": true,
        "activeCursors": board.len(),
    }))
    .into_response()
}

/// `GET /api/cursors`
pub async fn list_cursors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cursors = state
        .cursors
        .as_ref()
        .map(CursorBoard::snapshot)
        .unwrap_or_default();
    Json(json!({
        "success": true,
        "cursors": cursors,
    }))
}

/// Periodically drop idle cursors and broadcast the result.
pub fn spawn_pruner(state: Arc<AppState>, timeout: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let Some(board) = state.cursors.as_ref() else {
                break;
            };
            let removed = board.prune_stale(timeout);
            if !removed.is_empty() {
                debug!(removed = ?removed, "Removed inactive cursors");
                broadcast(&state, board);
            }
        }
    })
}
