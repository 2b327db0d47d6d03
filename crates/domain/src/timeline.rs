//! Timeline & Event Store — an append-only, hierarchical event log kept per
//! conversation turn.
//!
//! Modeled as an arena: events live in a flat `Vec<TimelineEvent>` addressed
//! by `EventId` (their index); parent/child links are stored as `EventId`s in
//! both directions. Because ids are assigned in creation order and a child's
//! parent must already exist, cycles are impossible by construction — no
//! back-pointer bookkeeping is needed.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared handle to a conversation's timeline. Locked only for the duration
/// of an `add_event`/`close_event` call, never across an `.await` — callers
/// dispatching concurrent work (e.g. several tool calls) each take and
/// release the lock around their own bracketing calls.
pub type TimelineHandle = Arc<Mutex<Timeline>>;

const DESCRIPTION_MAX_CHARS: usize = 100;

/// Index into a [`Timeline`]'s event arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStart,
    AgentStop,
    AgentError,
    AgentThinking,
    AgentResponse,
    UserInput,
    ToolCall,
    ToolResult,
    PlanCreated,
    PlanUpdated,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    CodeExecution,
    WebBrowse,
    FileOperation,
    System,
    Error,
}

impl EventType {
    /// Events that carry their own terminal meaning and are closed
    /// immediately on creation rather than awaiting a later `close_event`.
    fn is_direct_terminal(self) -> bool {
        matches!(self, EventType::UserInput | EventType::AgentResponse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Success,
    Error,
    Unset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub title: String,
    /// Truncated to `DESCRIPTION_MAX_CHARS`; full content belongs in `metadata`.
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EventId>,
    #[serde(default)]
    pub children: Vec<EventId>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,

    /// Monotonic start instant, used to compute `duration_s` precisely when
    /// available. Not serialized — wall-clock `timestamp`/`duration_s` are
    /// the wire representation.
    #[serde(skip)]
    started_at: Option<Instant>,
}

/// Truncate a description to at most `max` chars on a char boundary,
/// appending `...` when truncated.
fn truncate_description(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let truncated: String = s.chars().take(max).collect();
    format!("{truncated}...")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub timeline_id: Uuid,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Root event ids, in creation order.
    pub roots: Vec<EventId>,
    /// The arena. `events[i].event_id` corresponds to `EventId(i as u32)`.
    pub events: Vec<TimelineEvent>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Optional filter applied to [`Timeline::get_events`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub tag: Option<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl Timeline {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            timeline_id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            created_at: now,
            updated_at: now,
            roots: Vec::new(),
            events: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Append a new event. Returns its [`EventId`].
    ///
    /// Sets `status = Started` unless `event_type` is direct-terminal (e.g.
    /// `user_input`), in which case it is immediately `Success`.
    pub fn add_event(
        &mut self,
        event_type: EventType,
        title: impl Into<String>,
        description: impl Into<String>,
        parent: Option<EventId>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> EventId {
        let id = EventId(self.events.len() as u32);
        let now = Utc::now();
        let direct_terminal = event_type.is_direct_terminal();

        let event = TimelineEvent {
            event_id: Uuid::new_v4(),
            event_type,
            title: title.into(),
            description: truncate_description(&description.into(), DESCRIPTION_MAX_CHARS),
            timestamp: now,
            parent_id: parent,
            children: Vec::new(),
            metadata: metadata.unwrap_or_default(),
            status: if direct_terminal {
                EventStatus::Success
            } else {
                EventStatus::Started
            },
            duration_s: if direct_terminal { Some(0.0) } else { None },
            tags: Vec::new(),
            started_at: if direct_terminal {
                None
            } else {
                Some(Instant::now())
            },
        };

        self.events.push(event);

        match parent {
            Some(parent_id) => {
                if let Some(p) = self.events.get_mut(parent_id.0 as usize) {
                    p.children.push(id);
                }
            }
            None => self.roots.push(id),
        }

        self.updated_at = now;
        id
    }

    /// Close an event exactly once. Second and later calls are no-ops.
    pub fn close_event(
        &mut self,
        id: EventId,
        status: EventStatus,
        result_metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        let Some(event) = self.events.get_mut(id.0 as usize) else {
            return;
        };
        if event.status != EventStatus::Started {
            return; // idempotent: already closed (or never opened as pending)
        }

        let duration = event
            .started_at
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or_else(|| (Utc::now() - event.timestamp).num_milliseconds().max(0) as f64 / 1000.0);

        event.status = status;
        event.duration_s = Some(duration);
        if let Some(extra) = result_metadata {
            event.metadata.extend(extra);
        }

        self.updated_at = Utc::now();
    }

    /// Look up an event by id.
    pub fn get_event(&self, id: EventId) -> Option<&TimelineEvent> {
        self.events.get(id.0 as usize)
    }

    /// Filtered view over events (flat, not reconstructed as a subtree —
    /// callers walk `children` via `get_event` when the subtree is needed).
    pub fn get_events(&self, filter: &EventFilter) -> Vec<&TimelineEvent> {
        self.events
            .iter()
            .filter(|e| {
                if let Some(t) = filter.event_type {
                    if e.event_type != t {
                        return false;
                    }
                }
                if let Some(ref tag) = filter.tag {
                    if !e.tags.iter().any(|t| t == tag) {
                        return false;
                    }
                }
                if let Some((start, end)) = filter.time_range {
                    if e.timestamp < start || e.timestamp > end {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_event_defaults_to_started() {
        let mut tl = Timeline::new("c1");
        let id = tl.add_event(EventType::ToolCall, "web_search", "searching", None, None);
        assert_eq!(tl.get_event(id).unwrap().status, EventStatus::Started);
        assert!(tl.get_event(id).unwrap().duration_s.is_none());
    }

    #[test]
    fn user_input_is_direct_terminal() {
        let mut tl = Timeline::new("c1");
        let id = tl.add_event(EventType::UserInput, "user", "hi", None, None);
        assert_eq!(tl.get_event(id).unwrap().status, EventStatus::Success);
    }

    #[test]
    fn close_event_is_idempotent() {
        let mut tl = Timeline::new("c1");
        let id = tl.add_event(EventType::ToolCall, "x", "y", None, None);
        tl.close_event(id, EventStatus::Success, None);
        let first_duration = tl.get_event(id).unwrap().duration_s;

        std::thread::sleep(std::time::Duration::from_millis(5));
        tl.close_event(id, EventStatus::Error, None);

        let event = tl.get_event(id).unwrap();
        assert_eq!(event.status, EventStatus::Success, "second close must not change status");
        assert_eq!(event.duration_s, first_duration, "second close must not change duration");
    }

    #[test]
    fn close_event_records_error_metadata() {
        let mut tl = Timeline::new("c1");
        let id = tl.add_event(EventType::ToolCall, "x", "y", None, None);
        let mut meta = serde_json::Map::new();
        meta.insert("error".into(), "boom".into());
        tl.close_event(id, EventStatus::Error, Some(meta));
        let event = tl.get_event(id).unwrap();
        assert_eq!(event.status, EventStatus::Error);
        assert_eq!(event.metadata.get("error").unwrap(), "boom");
    }

    #[test]
    fn parent_child_linkage() {
        let mut tl = Timeline::new("c1");
        let parent = tl.add_event(EventType::AgentThinking, "think", "...", None, None);
        let child = tl.add_event(EventType::ToolCall, "call", "...", Some(parent), None);

        assert_eq!(tl.get_event(parent).unwrap().children, vec![child]);
        assert_eq!(tl.get_event(child).unwrap().parent_id, Some(parent));
        assert_eq!(tl.roots, vec![parent]);
    }

    #[test]
    fn description_truncated_to_100_chars() {
        let mut tl = Timeline::new("c1");
        let long = "x".repeat(250);
        let id = tl.add_event(EventType::System, "t", long, None, None);
        let event = tl.get_event(id).unwrap();
        assert_eq!(event.description.chars().count(), 103); // 100 + "..."
    }

    #[test]
    fn updated_at_advances_on_add_and_close() {
        let mut tl = Timeline::new("c1");
        let created = tl.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id = tl.add_event(EventType::System, "t", "d", None, None);
        assert!(tl.updated_at >= created);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let before_close = tl.updated_at;
        tl.close_event(id, EventStatus::Success, None);
        assert!(tl.updated_at >= before_close);
    }

    #[test]
    fn filter_by_type() {
        let mut tl = Timeline::new("c1");
        tl.add_event(EventType::ToolCall, "a", "d", None, None);
        tl.add_event(EventType::System, "b", "d", None, None);
        let hits = tl.get_events(&EventFilter {
            event_type: Some(EventType::ToolCall),
            ..Default::default()
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "a");
    }

    #[test]
    fn two_events_never_share_an_id() {
        let mut tl = Timeline::new("c1");
        let a = tl.add_event(EventType::System, "a", "d", None, None);
        let b = tl.add_event(EventType::System, "b", "d", None, None);
        assert_ne!(a.0, b.0);
    }
}
