//! `GET /api/conversations`, `GET /api/conversations/{id}`, and
//! `GET /api/conversations/{id}/timeline` (spec.md §6).

use axum::extract::{Path, State};
use axum::Json;
use sa_conversations::message::Message as ConvMessage;
use sa_domain::timeline::Timeline;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: String,
    pub title: String,
    pub messages: Vec<ConvMessage>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub events: Vec<sa_domain::timeline::TimelineEvent>,
    pub event_count: usize,
}

impl From<Timeline> for TimelineResponse {
    fn from(timeline: Timeline) -> Self {
        Self {
            event_count: timeline.events.len(),
            events: timeline.events,
        }
    }
}

fn empty_timeline() -> Json<TimelineResponse> {
    Json(TimelineResponse { events: Vec::new(), event_count: 0 })
}

pub async fn list_conversations(State(state): State<AppState>) -> Result<Json<Vec<ConversationResponse>>, ApiError> {
    let mut out = Vec::new();
    for metadata in state.conversations.list() {
        let messages = state.conversations.load_messages(&metadata.id)?;
        out.push(ConversationResponse {
            id: metadata.id,
            title: metadata.title,
            messages,
            created_at: metadata.created_at,
            updated_at: metadata.updated_at,
        });
    }
    Ok(Json(out))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let metadata = state
        .conversations
        .get(&id)
        .ok_or_else(|| ApiError(sa_domain::error::Error::NotFound(format!("conversation {id} not found"))))?;
    let messages = state.conversations.load_messages(&id)?;

    Ok(Json(ConversationResponse {
        id: metadata.id,
        title: metadata.title,
        messages,
        created_at: metadata.created_at,
        updated_at: metadata.updated_at,
    }))
}

pub async fn get_conversation_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TimelineResponse>, ApiError> {
    if !state.conversations.exists(&id) {
        if id.starts_with("mock-") || id.starts_with("new-") {
            state.conversations.create(&id, "")?;
            return Ok(empty_timeline());
        }
        return Err(ApiError(sa_domain::error::Error::NotFound(format!("conversation {id} not found"))));
    }

    match state.timelines.lock().get(&id).cloned() {
        Some(handle) => Ok(Json(handle.lock().clone().into())),
        None => Ok(empty_timeline()),
    }
}
