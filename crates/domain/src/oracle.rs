//! The LLM oracle boundary.
//!
//! The transport that actually talks to a model is an external collaborator
//! (out of scope per spec — see `original_source`'s provider clients for
//! what a real implementation looks like). This module defines only the
//! trait the agent loop drives and the response shape it expects back, so
//! the loop can be exercised against a test double.

use async_trait::async_trait;

use crate::error::Result;
use crate::tool::{Message, ToolCall, ToolDefinition};

/// One completion from the oracle: either plain text or one or more
/// requested tool calls (never both — a model either answers or acts).
#[derive(Debug, Clone)]
pub enum OracleResponse {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// Abstraction over "send conversation history + available tools, get back
/// a completion." Implementations own model selection, auth, and retries;
/// the agent loop only ever sees this trait.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(
        &self,
        history: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<OracleResponse>;
}
