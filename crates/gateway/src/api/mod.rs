pub mod conversations;
pub mod error;
pub mod health;
pub mod message;
pub mod ws;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Nexagent API is running", "status": "active" }))
}

/// Build the full API router (spec.md §6).
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health::health))
        .route("/api/message", axum::routing::post(message::post_message))
        .route("/api/conversations", get(conversations::list_conversations))
        .route("/api/conversations/:id", get(conversations::get_conversation))
        .route("/api/conversations/:id/timeline", get(conversations::get_conversation_timeline))
        .route("/api/ws/timeline/:id", get(ws::ws_timeline))
}
