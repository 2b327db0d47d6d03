//! `GET /api/health` (spec.md §6) — liveness probe with a sliding-window
//! rate limit keyed on the client's `host:port`, grounded on the original
//! server's per-socket rate-limit table rather than `tower_governor`'s
//! per-IP default (the spec's key explicitly includes the ephemeral port).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::state::AppState;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);
const RATE_LIMIT_MAX_REQUESTS: u32 = 10;

struct WindowEntry {
    first_request: Instant,
    count: u32,
}

/// Per-process sliding-window table, one entry per `host:port`. Stale
/// entries are swept on each request rather than on a timer — the table
/// only ever grows by the number of distinct recent clients.
#[derive(Default)]
pub struct HealthRateLimiter {
    windows: Mutex<HashMap<String, WindowEntry>>,
}

impl HealthRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(retry_after_secs)` if `client_id` is over the limit.
    fn check(&self, client_id: &str) -> Option<u64> {
        let mut windows = self.windows.lock();
        windows.retain(|_, entry| entry.first_request.elapsed() < RATE_LIMIT_WINDOW);

        match windows.get_mut(client_id) {
            Some(entry) => {
                entry.count += 1;
                if entry.count > RATE_LIMIT_MAX_REQUESTS {
                    let remaining = RATE_LIMIT_WINDOW.saturating_sub(entry.first_request.elapsed());
                    Some(remaining.as_secs())
                } else {
                    None
                }
            }
            None => {
                windows.insert(
                    client_id.to_owned(),
                    WindowEntry { first_request: Instant::now(), count: 1 },
                );
                None
            }
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server: &'static str,
    version: &'static str,
    timestamp_ms: i64,
    connections: usize,
    conversations: usize,
    client: String,
}

pub async fn health(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let client_id = addr.to_string();

    if let Some(retry_after) = state.health_rate_limiter.check(&client_id) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "status": "error", "message": "Too many requests", "retry_after": retry_after })),
        )
            .into_response();
    }

    let body = HealthResponse {
        status: "ok",
        server: "Nexagent API",
        version: env!("CARGO_PKG_VERSION"),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        connections: state.broadcaster.subscriber_count(),
        conversations: state.conversations.list().len(),
        client: client_id,
    };

    Json(body).into_response()
}
