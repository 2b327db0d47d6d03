//! End-to-end scenarios from spec.md §8. Each test drives the real HTTP/WS
//! surface (`sa_gateway::api::router()`) over an `AppState` wired with a
//! scripted oracle and in-memory/unavailable-driver stand-ins for the LLM
//! transport and the headless browser — both explicitly out of scope
//! (spec.md §1) and exercised here only through their trait boundaries.
//!
//! Scenario 4 (the browser retry ladder) is covered at the pipeline level
//! in `sa-browser`'s own test suite (`crates/browser/src/pipeline.rs`),
//! since that is where the ladder's tier transitions actually live.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use sa_browser::{BrowserPipeline, UnavailableDriver};
use sa_domain::config::Config;
use sa_domain::error::Result as DomainResult;
use sa_domain::oracle::{Oracle, OracleResponse};
use sa_domain::tool::{Message, ToolCall, ToolDefinition};
use sa_conversations::ConversationManager;
use sa_gateway::api;
use sa_gateway::runtime::agent_loop::compute_max_steps;
use sa_gateway::runtime::{AgentLoop, AgentOutcome, CancelMap};
use sa_gateway::state::AppState;
use sa_tools::builtin::terminate::TerminateTool;
use sa_tools::registry::{Tool, ToolRegistry};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

// ── Test doubles ─────────────────────────────────────────────────────────

/// Pops pre-scripted responses in order; cycles to an empty `Text` once
/// exhausted rather than panicking, so a test that over-calls fails on an
/// assertion instead of a poisoned mutex.
struct ScriptedOracle {
    script: StdMutex<std::collections::VecDeque<OracleResponse>>,
}

impl ScriptedOracle {
    fn new(script: Vec<OracleResponse>) -> Self {
        Self { script: StdMutex::new(script.into()) }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(
        &self,
        _history: &[Message],
        _system_prompt: &str,
        _tools: &[ToolDefinition],
    ) -> DomainResult<OracleResponse> {
        let mut script = self.script.lock().unwrap();
        Ok(script.pop_front().unwrap_or(OracleResponse::Text(String::new())))
    }
}

/// An oracle that always asks to call `echo`, used to drive a long-running
/// agent loop for the cancellation scenario. Counts completed calls so the
/// test can observe "step 3 has completed" before cancelling.
struct LoopingToolOracle {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Oracle for LoopingToolOracle {
    async fn complete(
        &self,
        _history: &[Message],
        _system_prompt: &str,
        _tools: &[ToolDefinition],
    ) -> DomainResult<OracleResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OracleResponse::ToolCalls(vec![ToolCall {
            call_id: n.to_string(),
            tool_name: "echo".to_owned(),
            arguments: serde_json::json!({ "n": n }),
        }]))
    }
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its input"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({})
    }
    async fn execute(&self, args: Value) -> sa_domain::tool::ToolResult {
        sa_domain::tool::ToolResult::ok(args.to_string())
    }
}

/// Stands in for the real `web_search` tool (which hits the network) so
/// the agent-path scenario is deterministic and offline.
struct StubWebSearchTool;

#[async_trait]
impl Tool for StubWebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }
    fn description(&self) -> &str {
        "stub search"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": { "query": { "type": "string" } } })
    }
    async fn execute(&self, _args: Value) -> sa_domain::tool::ToolResult {
        sa_domain::tool::ToolResult::ok("Example Domain")
    }
}

fn build_state(oracle: Arc<dyn Oracle>, data_root: std::path::PathBuf) -> AppState {
    let config = Arc::new(Config::default());
    let conversations = Arc::new(ConversationManager::new(data_root));

    let registry = ToolRegistry::new();
    registry.register(Arc::new(TerminateTool)).unwrap();
    registry.register(Arc::new(EchoTool)).unwrap();
    registry.register(Arc::new(StubWebSearchTool)).unwrap();
    let registry = Arc::new(registry);

    let primary: Arc<dyn sa_browser::BrowserDriver> = Arc::new(UnavailableDriver::new("primary"));
    let fallback: Arc<dyn sa_browser::BrowserDriver> = Arc::new(UnavailableDriver::new("fallback"));
    let search_tool: Arc<dyn Tool> = Arc::new(StubWebSearchTool);
    let pipeline = Arc::new(BrowserPipeline::new(
        primary,
        fallback,
        config.browser.clone(),
        None,
        search_tool,
    ));

    AppState::new(config, conversations, registry, pipeline, oracle)
}

async fn post_message(state: &AppState, body: Value) -> (StatusCode, Value) {
    let app = api::router().with_state(state.clone());
    let request = Request::builder()
        .method("POST")
        .uri("/api/message")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// ── Scenario 1: greeting fast path ───────────────────────────────────────

#[tokio::test]
async fn greeting_fast_path() {
    let dir = tempfile::tempdir().unwrap();
    let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new(vec![]));
    let state = build_state(oracle, dir.path().to_path_buf());

    let (status, body) = post_message(&state, serde_json::json!({ "content": "hi" })).await;

    assert_eq!(status, StatusCode::OK);
    let content = body["content"].as_str().unwrap();
    assert!(
        ["Hello! How can I help you today?", "Hi there! What can I do for you?", "Hey! What would you like to work on?"]
            .contains(&content),
        "unexpected greeting response: {content}"
    );

    let events = body["timeline"]["events"].as_array().unwrap();
    let user_inputs = events.iter().filter(|e| e["type"] == "user_input").count();
    let agent_responses = events.iter().filter(|e| e["type"] == "agent_response").count();
    let tool_calls = events.iter().filter(|e| e["type"] == "tool_call").count();
    assert_eq!(user_inputs, 1);
    assert_eq!(agent_responses, 1);
    assert_eq!(tool_calls, 0);
}

// ── Boundary B1: empty prompt is a validation error ──────────────────────

#[tokio::test]
async fn empty_prompt_is_rejected_with_400() {
    let dir = tempfile::tempdir().unwrap();
    let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new(vec![]));
    let state = build_state(oracle, dir.path().to_path_buf());

    let (status, _body) = post_message(&state, serde_json::json!({ "content": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _body) = post_message(&state, serde_json::json!({ "content": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Scenario 2: arithmetic direct answer ─────────────────────────────────

#[tokio::test]
async fn arithmetic_direct_answer() {
    let dir = tempfile::tempdir().unwrap();
    let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new(vec![]));
    let state = build_state(oracle, dir.path().to_path_buf());

    let started = std::time::Instant::now();
    let (status, body) = post_message(&state, serde_json::json!({ "content": "what is 5+5" })).await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"].as_str().unwrap(), "The result of 5+5 is 10.");

    let events = body["timeline"]["events"].as_array().unwrap();
    assert!(events.iter().all(|e| e["type"] != "tool_call"));
    assert!(elapsed.as_millis() < 200, "expected a warm in-process direct answer, took {elapsed:?}");
}

// ── Scenario 3: agent path with one tool call ────────────────────────────

#[tokio::test]
async fn agent_path_with_one_tool_call() {
    let dir = tempfile::tempdir().unwrap();
    let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new(vec![
        OracleResponse::ToolCalls(vec![ToolCall {
            call_id: "1".into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({ "query": "title of example.com" }),
        }]),
        OracleResponse::ToolCalls(vec![ToolCall {
            call_id: "2".into(),
            tool_name: "terminate".into(),
            arguments: serde_json::json!({
                "status": "success",
                "detail": "The title of https://example.com is Example Domain.",
            }),
        }]),
    ]));
    let state = build_state(oracle, dir.path().to_path_buf());

    let (status, body) = post_message(
        &state,
        serde_json::json!({
            "content": "fetch the title of https://example.com",
            "processing_mode": "agent",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["content"].as_str().unwrap().contains("Example Domain"));

    let events = body["timeline"]["events"].as_array().unwrap();
    let tool_call = events.iter().find(|e| e["type"] == "tool_call" && e["title"] == "web_search");
    assert!(tool_call.is_some(), "expected a web_search tool_call event in the timeline");
    let tool_call = tool_call.unwrap();
    assert_eq!(tool_call["status"], "success");
    assert!(tool_call["metadata"]["output"].as_str().unwrap().contains("Example Domain"));
}

// ── Scenario 5: WebSocket supersession ───────────────────────────────────

#[tokio::test]
async fn websocket_supersession() {
    let dir = tempfile::tempdir().unwrap();
    let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new(vec![]));
    let state = build_state(oracle, dir.path().to_path_buf());

    let conversation_id = "conv-ws-1";
    state.conversations.create(conversation_id, "hello").unwrap();

    let app = api::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    let url = format!("ws://{addr}/api/ws/timeline/{conversation_id}");

    let (mut ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    // Drain WS1's connection_established frame so it's fully registered
    // before WS2 connects and supersedes it.
    let _ = recv_frame(&mut ws1).await;

    let (mut ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // WS1 must observe its own close (superseded).
    let ws1_close = loop {
        match recv_frame(&mut ws1).await {
            WsMessage::Close(frame) => break frame,
            _ => continue,
        }
    };
    let reason = ws1_close.map(|f| f.reason.to_string()).unwrap_or_default();
    assert_eq!(reason, "superseded");

    // WS2 must see connection_established then timeline_update.
    let first = recv_frame(&mut ws2).await;
    assert!(matches!(first, WsMessage::Text(ref t) if t.contains("connection_established")));
    let second = recv_frame(&mut ws2).await;
    assert!(matches!(second, WsMessage::Text(ref t) if t.contains("timeline_update")));

    // A subsequent broadcast reaches only WS2.
    let timeline = sa_domain::timeline::Timeline::new(conversation_id.to_owned());
    state.broadcaster.broadcast(conversation_id, timeline);

    let third = recv_frame(&mut ws2).await;
    assert!(matches!(third, WsMessage::Text(ref t) if t.contains("timeline_update")));
}

/// Receive the next frame off a WS client stream, with a generous timeout
/// so a protocol regression fails the test instead of hanging forever.
async fn recv_frame<S>(stream: &mut S) -> WsMessage
where
    S: futures_util::stream::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    use futures_util::StreamExt;
    tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for a websocket frame")
        .expect("websocket stream ended")
        .expect("websocket error")
}

// ── Scenario 6: cancellation mid-loop ────────────────────────────────────

#[tokio::test]
async fn cancellation_mid_loop() {
    let calls = Arc::new(AtomicU32::new(0));
    let oracle: Arc<dyn Oracle> = Arc::new(LoopingToolOracle { calls: calls.clone() });

    let registry = ToolRegistry::new();
    registry.register(Arc::new(TerminateTool)).unwrap();
    registry.register(Arc::new(EchoTool)).unwrap();
    let registry = Arc::new(registry);

    let agent_loop = Arc::new(AgentLoop::new(oracle, registry));
    let cancel_map = Arc::new(CancelMap::new());
    let conversation_id = "conv-cancel-1";
    let cancel = cancel_map.register(conversation_id);

    // A prompt long and keyword-rich enough to need well over 3 steps.
    let prompt = "then finally afterwards fetch http www url website browse webpage \
                  analyze parse extract transform and build a comprehensive report";
    assert!(compute_max_steps(prompt) > 10);

    let timeline = Arc::new(parking_lot::Mutex::new(sa_domain::timeline::Timeline::new(conversation_id)));
    let mut history = vec![Message::user(prompt)];

    let run_cancel = cancel.clone();
    let run_timeline = timeline.clone();
    let handle = tokio::spawn(async move {
        agent_loop
            .run(conversation_id, "sys", prompt, &mut history, &run_timeline, run_cancel)
            .await
    });

    // Let at least 3 steps complete, then cancel.
    while calls.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    cancel.cancel();

    let outcome = handle.await.unwrap().unwrap();
    match outcome {
        AgentOutcome::Cancelled { steps_taken, .. } => {
            assert!(steps_taken >= 3, "expected cancellation after at least 3 completed steps");
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }

    let events = timeline.lock().clone().events;
    assert!(
        events.iter().any(|e| e.event_type == sa_domain::timeline::EventType::AgentError
            && e.description == "cancelled"),
        "expected an agent_error \"cancelled\" event"
    );

    let tool_calls_before_stop = events
        .iter()
        .filter(|e| e.event_type == sa_domain::timeline::EventType::ToolCall)
        .count();
    assert_eq!(
        tool_calls_before_stop as u32,
        calls.load(Ordering::SeqCst).min(tool_calls_before_stop as u32),
        "no tool_call events should be created after cancellation is observed"
    );
}
