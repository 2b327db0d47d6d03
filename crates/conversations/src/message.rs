//! The `Message` data model (spec.md §3): a single turn in a conversation's
//! transcript, distinct from `sa_domain::tool::Message` — that one is the
//! provider-agnostic shape the oracle is driven with, this one is what gets
//! persisted to `messages.json` and walked back for display.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline_ref: Option<Uuid>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp_ms,
            timeline_ref: None,
        }
    }

    pub fn with_timeline_ref(mut self, timeline_ref: Uuid) -> Self {
        self.timeline_ref = Some(timeline_ref);
        self
    }
}
