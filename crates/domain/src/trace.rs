use serde::Serialize;

/// Structured trace events emitted across the Nexagent crates, alongside
/// the usual `tracing` spans — these are the subset worth grepping for as
/// discrete, machine-parseable occurrences rather than free-form log lines.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    OracleRequest {
        conversation_id: String,
        step: u32,
        duration_ms: u64,
    },
    ClassifierDecision {
        conversation_id: String,
        route: String,
        score: f64,
    },
    DirectResponseMatched {
        conversation_id: String,
        category: String,
    },
    AgentStepBudget {
        conversation_id: String,
        max_steps: u32,
    },
    ToolDispatch {
        conversation_id: String,
        tool_name: String,
        duration_ms: u64,
        ok: bool,
    },
    BrowserTierAttempt {
        conversation_id: String,
        tier: String,
        ok: bool,
    },
    ConversationCreated {
        conversation_id: String,
    },
    ConversationPersistFailed {
        conversation_id: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "nexagent_event");
    }
}
