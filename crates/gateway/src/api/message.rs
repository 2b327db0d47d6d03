//! `POST /api/message` (spec.md §4.J) — the router: classify (or take the
//! caller's explicit `processing_mode`), answer directly or drive the agent
//! loop, persist, broadcast, respond.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use parking_lot::Mutex as PMutex;
use sa_domain::error::Error;
use sa_domain::timeline::{EventType, Timeline};
use sa_domain::tool::Message as OracleMessage;
use sa_conversations::message::{Message as ConvMessage, Role as ConvRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::ApiError;
use crate::classifier::Kind;
use crate::direct_responder;
use crate::state::AppState;

const CHAT_SYSTEM_PROMPT: &str =
    "You are Nexagent, a conversational assistant. Answer the user directly \
     and do not call any tools.";
const AGENT_SYSTEM_PROMPT: &str =
    "You are Nexagent, an agent that completes tasks by reasoning step by \
     step and invoking tools when they help. Call `terminate` once the task \
     is complete.";

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
    pub conversation_id: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    pub processing_mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub content: String,
    pub conversation_id: String,
    pub timestamp: i64,
    pub timeline: Timeline,
}

fn conv_to_oracle(messages: &[ConvMessage]) -> Vec<OracleMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            ConvRole::User => OracleMessage::user(m.content.clone()),
            ConvRole::Assistant => OracleMessage::assistant(m.content.clone()),
            ConvRole::System => OracleMessage::system(m.content.clone()),
        })
        .collect()
}

pub async fn post_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if request.content.trim().is_empty() {
        return Err(ApiError(Error::Validation("prompt must not be empty".into())));
    }

    let conversation_id = match &request.conversation_id {
        Some(id) if state.conversations.exists(id) => id.clone(),
        Some(id) => {
            state.conversations.create(id, &request.content)?;
            id.clone()
        }
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            state.conversations.create(&id, &request.content)?;
            id
        }
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    state.conversations.append_message(
        &conversation_id,
        ConvMessage::new(ConvRole::User, request.content.clone(), now_ms),
    )?;

    let timeline = Arc::new(PMutex::new(Timeline::new(conversation_id.clone())));
    {
        let mut tl = timeline.lock();
        tl.add_event(EventType::UserInput, "user_input", request.content.clone(), None, None);
    }

    let mode = request.processing_mode.as_deref().unwrap_or("auto");
    let kind = match mode {
        "chat" => Kind::Chat,
        "agent" => Kind::Agent,
        _ => state.classifier.classify(&conversation_id, &request.content).kind,
    };

    let history_so_far = state.conversations.load_messages(&conversation_id)?;
    let mut history = conv_to_oracle(&history_so_far);

    let direct_hit = if kind == Kind::Chat {
        direct_responder::try_answer(&conversation_id, &request.content)
    } else {
        None
    };

    let content = if let Some(answer) = direct_hit {
        let mut tl = timeline.lock();
        tl.add_event(EventType::AgentResponse, "agent_response", answer.clone(), None, None);
        answer
    } else {
        let system_prompt = request.system_prompt.clone().unwrap_or_else(|| {
            if kind == Kind::Chat {
                CHAT_SYSTEM_PROMPT.to_owned()
            } else {
                AGENT_SYSTEM_PROMPT.to_owned()
            }
        });

        let cancel = state.cancel_map.register(&conversation_id);
        let outcome = state
            .agent_loop
            .run(&conversation_id, &system_prompt, &request.content, &mut history, &timeline, cancel)
            .await;
        state.cancel_map.remove(&conversation_id);

        match outcome {
            Ok(outcome) => outcome.content().to_owned(),
            Err(e) => return Err(ApiError(e)),
        }
    };

    let timestamp = chrono::Utc::now().timestamp_millis();
    let timeline_snapshot = timeline.lock().clone();

    state.conversations.append_message(
        &conversation_id,
        ConvMessage::new(ConvRole::Assistant, content.clone(), timestamp)
            .with_timeline_ref(timeline_snapshot.timeline_id),
    )?;
    state.timelines.lock().insert(conversation_id.clone(), timeline.clone());
    state.broadcaster.broadcast(&conversation_id, timeline_snapshot.clone());

    Ok(Json(MessageResponse {
        id: uuid::Uuid::new_v4().to_string(),
        content,
        conversation_id,
        timestamp,
        timeline: timeline_snapshot,
    }))
}
