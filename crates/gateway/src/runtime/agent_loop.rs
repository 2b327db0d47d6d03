//! Agent Execution Loop (spec.md §4.H) — the iterative
//! think → tool-call → observe state machine driven against the LLM
//! oracle, with dynamic step budgeting, cancellation, and the `terminate`
//! sentinel tool.

use std::sync::Arc;
use std::time::Duration;

use sa_domain::error::Result;
use sa_domain::oracle::{Oracle, OracleResponse};
use sa_domain::timeline::{EventId, EventStatus, EventType, TimelineHandle};
use sa_domain::tool::{Message, ToolCall};
use sa_tools::builtin::terminate::TERMINATE_TOOL_NAME;
use sa_tools::dispatcher::{dispatch, DEFAULT_TOOL_TIMEOUT_SEC};
use sa_tools::registry::ToolRegistry;

use super::cancel::CancelToken;

/// Timeout given to tools whose execution loads a model or spins up a
/// browser session (spec.md §4.H: "60s for model-load-heavy tools").
const MODEL_LOAD_HEAVY_TIMEOUT_SEC: u64 = 60;
const MODEL_LOAD_HEAVY_TOOLS: &[&str] = &["code_execution", "process_control", "browser_fetch"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dynamic step budget (spec.md §4.H)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const BASE_STEPS: u32 = 20;
const MAX_STEPS_CEILING: u32 = 100;

const WEB_KEYWORDS: &[&str] = &["http", "https", "www", "url", "website", "browse", "webpage"];
const DATA_PROCESSING_VERBS: &[&str] = &["analyze", "parse", "extract", "transform", "aggregate", "summarize", "filter"];
const STEP_CONNECTORS: &[&str] = &["then", "finally", "afterwards", "next,", "once done"];
const COMPREHENSIVE_INDICATORS: &[&str] = &["comprehensive", "exhaustive", "detailed"];

fn contains_word(lower: &str, needle: &str) -> bool {
    if needle.contains(' ') || needle.ends_with(',') {
        return lower.contains(needle);
    }
    lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == needle)
}

fn count_hits(lower: &str, bank: &[&str]) -> u32 {
    bank.iter().filter(|k| contains_word(lower, k)).count() as u32
}

/// Compute `max_steps` once per user prompt (spec.md §4.H, §8 B2).
pub fn compute_max_steps(prompt: &str) -> u32 {
    let lower = prompt.to_lowercase();
    let mut steps = BASE_STEPS;

    steps += (count_hits(&lower, WEB_KEYWORDS) * 5).min(25);
    steps += (count_hits(&lower, STEP_CONNECTORS) * 3).min(30);
    steps += (count_hits(&lower, DATA_PROCESSING_VERBS) * 4).min(20);

    if COMPREHENSIVE_INDICATORS.iter().any(|k| lower.contains(k)) {
        steps += 30;
    }
    if prompt.chars().count() > 200 {
        steps += 10;
    }
    if prompt.chars().count() > 500 {
        steps += 15;
    }

    steps.min(MAX_STEPS_CEILING)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Required-input gate (spec.md §4.H)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const INTENT_KEYWORDS: &[&str] = &["add to cart", "order", "buy", "find", "search for"];

/// Scans the raw user prompt for an intent keyword with no accompanying
/// quantity/item detail. Returns the text of a clarifying question when
/// the gate trips, `None` when the prompt should proceed to the loop.
fn required_input_gate(prompt: &str) -> Option<String> {
    let lower = prompt.to_lowercase();
    let trimmed = lower.trim();

    for keyword in INTENT_KEYWORDS {
        let Some(pos) = trimmed.find(keyword) else { continue };
        let remainder = trimmed[pos + keyword.len()..].trim_matches(|c: char| c.is_whitespace() || c == '.' || c == '!' || c == '?');
        let has_specifics = !remainder.is_empty() || trimmed.chars().any(|c| c.is_ascii_digit());
        if !has_specifics {
            return Some(format!(
                "Could you tell me more specifically what you'd like to {keyword}? \
                 I need an item (and quantity, if relevant) before I can proceed."
            ));
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response formatting (spec.md §4.H)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const FINAL_OUTPUT_HEADING: &str = "## Final Output";

/// Post-process the final assistant content before it's surfaced to the
/// user. The unredacted original always stays in the timeline metadata.
pub fn format_response(content: &str) -> String {
    if let Some(idx) = content.find(FINAL_OUTPUT_HEADING) {
        return content[idx + FINAL_OUTPUT_HEADING.len()..].trim().to_owned();
    }
    if content.contains("\n\n\n") {
        if let Some(last) = content.split("\n\n\n").last() {
            let trimmed = last.trim();
            if !trimmed.is_empty() {
                return trimmed.to_owned();
            }
        }
    }
    content.trim().to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The model called `terminate`, or the required-input gate short-
    /// circuited the loop before it started.
    Completed { content: String, steps_taken: u32 },
    /// `cancel()` was observed at the top of an iteration.
    Cancelled { partial: String, steps_taken: u32 },
    /// `step` reached `max_steps` before `terminate` was called.
    BudgetExhausted { partial: String, steps_taken: u32 },
}

impl AgentOutcome {
    pub fn content(&self) -> &str {
        match self {
            AgentOutcome::Completed { content, .. } => content,
            AgentOutcome::Cancelled { partial, .. } => partial,
            AgentOutcome::BudgetExhausted { partial, .. } => partial,
        }
    }
}

fn tool_timeout(name: &str) -> Duration {
    if MODEL_LOAD_HEAVY_TOOLS.contains(&name) {
        Duration::from_secs(MODEL_LOAD_HEAVY_TIMEOUT_SEC)
    } else {
        Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SEC)
    }
}

/// Drives one conversation turn's worth of think→act→observe iterations.
/// Holds no per-conversation state itself — `history`/`timeline`/`cancel`
/// are all owned by the caller (the conversation's single owning task,
/// spec.md §5), so one `AgentLoop` instance is shared across conversations.
pub struct AgentLoop {
    oracle: Arc<dyn Oracle>,
    registry: Arc<ToolRegistry>,
}

impl AgentLoop {
    pub fn new(oracle: Arc<dyn Oracle>, registry: Arc<ToolRegistry>) -> Self {
        Self { oracle, registry }
    }

    /// Run the loop to completion (terminate / cancel / budget exhaustion).
    /// `history` is mutated in place with every assistant/tool message
    /// seen, so the caller can persist the full transcript afterward.
    pub async fn run(
        &self,
        conversation_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        history: &mut Vec<Message>,
        timeline: &TimelineHandle,
        cancel: CancelToken,
    ) -> Result<AgentOutcome> {
        if let Some(clarification) = required_input_gate(user_prompt) {
            let mut tl = timeline.lock();
            tl.add_event(
                EventType::AgentResponse,
                "agent_response",
                clarification.clone(),
                None,
                None,
            );
            drop(tl);
            history.push(Message::assistant(clarification.clone()));
            return Ok(AgentOutcome::Completed {
                content: clarification,
                steps_taken: 0,
            });
        }

        let max_steps = compute_max_steps(user_prompt);
        sa_domain::trace::TraceEvent::AgentStepBudget {
            conversation_id: conversation_id.to_owned(),
            max_steps,
        }
        .emit();

        let agent_start = {
            let mut tl = timeline.lock();
            tl.add_event(
                EventType::AgentStart,
                "agent_start",
                format!("max_steps={max_steps}"),
                None,
                None,
            )
        };

        let mut last_text = String::new();
        let mut step: u32 = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                record_point_event(timeline, EventType::AgentError, "agent_error", "cancelled", agent_start);
                break AgentOutcome::Cancelled {
                    partial: format_response(&last_text),
                    steps_taken: step,
                };
            }

            if step >= max_steps {
                record_point_event(
                    timeline,
                    EventType::AgentError,
                    "agent_error",
                    "step budget exhausted",
                    agent_start,
                );
                break AgentOutcome::BudgetExhausted {
                    partial: format_response(&last_text),
                    steps_taken: step,
                };
            }

            let thinking_event = {
                let mut tl = timeline.lock();
                tl.add_event(
                    EventType::AgentThinking,
                    "agent_thinking",
                    format!("step {step}"),
                    Some(agent_start),
                    None,
                )
            };

            let tool_defs = self.registry.definitions();
            let oracle_started = std::time::Instant::now();
            let response = self.oracle.complete(history, system_prompt, &tool_defs).await;
            sa_domain::trace::TraceEvent::OracleRequest {
                conversation_id: conversation_id.to_owned(),
                step,
                duration_ms: oracle_started.elapsed().as_millis() as u64,
            }
            .emit();

            let response = match response {
                Ok(r) => {
                    close_event(timeline, thinking_event, EventStatus::Success, None);
                    r
                }
                Err(e) => {
                    close_event(
                        timeline,
                        thinking_event,
                        EventStatus::Error,
                        Some(error_metadata(&e.to_string())),
                    );
                    break AgentOutcome::BudgetExhausted {
                        partial: format_response(&last_text),
                        steps_taken: step,
                    };
                }
            };

            match response {
                OracleResponse::Text(text) => {
                    last_text = text.clone();
                    history.push(Message::assistant(text.clone()));
                    let mut tl = timeline.lock();
                    tl.add_event(
                        EventType::AgentResponse,
                        "agent_response",
                        text,
                        Some(agent_start),
                        None,
                    );
                }
                OracleResponse::ToolCalls(calls) => {
                    let mut terminated: Option<String> = None;

                    for call in calls {
                        let result = self
                            .dispatch_tool_call(&call, timeline, thinking_event)
                            .await;

                        if call.tool_name == TERMINATE_TOOL_NAME && !result.is_error() {
                            terminated = Some(
                                result
                                    .output
                                    .clone()
                                    .unwrap_or_default(),
                            );
                        }

                        let content = result.output.clone().unwrap_or_else(|| {
                            result.error.clone().unwrap_or_default()
                        });
                        history.push(Message::tool_result(call.call_id.clone(), content));
                    }

                    if let Some(detail) = terminated {
                        let final_text = terminate_detail_or(&detail, &last_text);
                        record_point_event(
                            timeline,
                            EventType::AgentStop,
                            "agent_stop",
                            "terminate called",
                            agent_start,
                        );
                        break AgentOutcome::Completed {
                            content: format_response(&final_text),
                            steps_taken: step + 1,
                        };
                    }
                }
            }

            step += 1;
        };

        close_event(timeline, agent_start, EventStatus::Success, None);
        Ok(outcome)
    }

    async fn dispatch_tool_call(
        &self,
        call: &ToolCall,
        timeline: &TimelineHandle,
        parent: EventId,
    ) -> sa_domain::tool::ToolResult {
        dispatch(
            &self.registry,
            &call.tool_name,
            call.arguments.clone(),
            true,
            tool_timeout(&call.tool_name),
            timeline,
            Some(parent),
        )
        .await
    }
}

fn terminate_detail_or(detail_json: &str, last_text: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(detail_json) {
        if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
            if !detail.is_empty() {
                return detail.to_owned();
            }
        }
    }
    last_text.to_owned()
}

fn error_metadata(message: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut meta = serde_json::Map::new();
    meta.insert("error".into(), serde_json::Value::String(message.to_owned()));
    meta
}

fn close_event(
    timeline: &TimelineHandle,
    id: EventId,
    status: EventStatus,
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
) {
    timeline.lock().close_event(id, status, metadata);
}

/// Record and immediately close a zero-duration marker event (`agent_error`,
/// `agent_stop`) — these report a moment, not a span of work, so they never
/// sit in `EventStatus::Started` waiting for a caller that will never close
/// them.
fn record_point_event(
    timeline: &TimelineHandle,
    event_type: EventType,
    title: &str,
    description: impl Into<String>,
    parent: EventId,
) -> EventId {
    let status = if event_type == EventType::AgentError {
        EventStatus::Error
    } else {
        EventStatus::Success
    };
    let mut tl = timeline.lock();
    let id = tl.add_event(event_type, title, description, Some(parent), None);
    tl.close_event(id, status, None);
    id
}
