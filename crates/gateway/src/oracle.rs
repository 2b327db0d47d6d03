//! The one concrete [`Oracle`] this gateway ships: an OpenAI-compatible
//! `/chat/completions` client (OpenRouter, a local vLLM/Ollama gateway, or
//! the official OpenAI API all speak this wire format). Model choice, auth,
//! and retries live here; the agent loop only ever sees the trait.
//!
//! Configured entirely from the environment — credentials don't belong in
//! `config.toml`.

use std::time::Duration;

use async_trait::async_trait;
use sa_domain::error::{Error, Result};
use sa_domain::oracle::{Oracle, OracleResponse};
use sa_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
const REQUEST_TIMEOUT_SEC: u64 = 120;

pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpOracle {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SEC))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    /// `NEXAGENT_ORACLE_BASE_URL`, `NEXAGENT_ORACLE_API_KEY`,
    /// `NEXAGENT_ORACLE_MODEL` — all optional, defaulting to OpenRouter.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("NEXAGENT_ORACLE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned()),
            std::env::var("NEXAGENT_ORACLE_API_KEY").ok(),
            std::env::var("NEXAGENT_ORACLE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned()),
        )
    }
}

// ── Wire format (OpenAI chat-completions shape) ─────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireToolCallFunction,
}

#[derive(Deserialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

fn to_wire_message(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if message.role == Role::Tool {
        if let MessageContent::Parts(parts) = &message.content {
            if let Some(ContentPart::ToolResult { tool_use_id, content, .. }) = parts.first() {
                return WireMessage {
                    role,
                    content: Some(content.clone()),
                    tool_call_id: Some(tool_use_id.clone()),
                };
            }
        }
    }

    WireMessage {
        role,
        content: Some(message.content.extract_all_text()),
        tool_call_id: None,
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete(
        &self,
        history: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<OracleResponse> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(WireMessage {
                role: "system",
                content: Some(system_prompt.to_owned()),
                tool_call_id: None,
            });
        }
        messages.extend(history.iter().map(to_wire_message));

        let wire_tools = tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        let request = WireRequest {
            model: &self.model,
            messages,
            tools: wire_tools,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Dependency(format!("oracle request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Dependency(format!("oracle returned {status}: {body}")));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::Dependency(format!("oracle response decode failed: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Dependency("oracle returned no choices".to_owned()))?;

        if !choice.message.tool_calls.is_empty() {
            let calls = choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| {
                    let arguments = serde_json::from_str(&c.function.arguments).unwrap_or(json!({}));
                    ToolCall {
                        call_id: c.id,
                        tool_name: c.function.name,
                        arguments,
                    }
                })
                .collect();
            return Ok(OracleResponse::ToolCalls(calls));
        }

        Ok(OracleResponse::Text(choice.message.content.unwrap_or_default()))
    }
}
