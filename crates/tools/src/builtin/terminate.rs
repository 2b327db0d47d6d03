//! The `terminate` sentinel tool.
//!
//! Zero side effects. Its only purpose is to let the model signal "I'm
//! done" with a status and an optional payload; the agent loop recognizes
//! calls to this tool by name and ends the iteration loop rather than
//! treating it as ordinary tool output (spec.md §4.H).

use async_trait::async_trait;
use sa_domain::tool::ToolResult;
use serde::Deserialize;

use crate::registry::Tool;

pub const TERMINATE_TOOL_NAME: &str = "terminate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminateStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminateArgs {
    pub status: TerminateStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

pub struct TerminateTool;

#[async_trait]
impl Tool for TerminateTool {
    fn name(&self) -> &str {
        TERMINATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Signal that the task is complete. Call this when you have a final answer, instead of producing further tool calls."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["success", "failure"] },
                "detail": { "type": "string" }
            },
            "required": ["status"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        match serde_json::from_value::<TerminateArgs>(args) {
            Ok(parsed) => {
                let status_str = match parsed.status {
                    TerminateStatus::Success => "success",
                    TerminateStatus::Failure => "failure",
                };
                ToolResult::ok(serde_json::json!({
                    "status": status_str,
                    "detail": parsed.detail,
                }).to_string())
            }
            Err(e) => ToolResult::err(format!("invalid terminate arguments: {e}")),
        }
    }
}
