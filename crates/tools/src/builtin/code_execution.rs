//! `code_execution` built-in tool — runs a shell command, foreground or
//! auto-backgrounded, via the process manager; `process_control` manages the
//! resulting background sessions.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use sa_domain::config::ExecSecurityConfig;
use sa_domain::tool::ToolResult;

use crate::exec::{exec, ExecRequest};
use crate::manager::ProcessManager;
use crate::process::{handle_process, ProcessRequest};
use crate::registry::Tool;

/// Denied-pattern check compiled once at construction, per
/// `ExecSecurityConfig.denied_patterns` (e.g. `rm -rf /`, `mkfs.*`).
struct DeniedPatterns {
    patterns: Vec<Regex>,
    audit_log: bool,
}

impl DeniedPatterns {
    fn compile(cfg: &ExecSecurityConfig) -> Self {
        let patterns = cfg
            .denied_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            patterns,
            audit_log: cfg.audit_log,
        }
    }

    fn is_denied(&self, command: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(command))
    }
}

pub struct CodeExecutionTool {
    manager: Arc<ProcessManager>,
    security: DeniedPatterns,
}

impl CodeExecutionTool {
    pub fn new(manager: Arc<ProcessManager>, security: &ExecSecurityConfig) -> Self {
        Self {
            manager,
            security: DeniedPatterns::compile(security),
        }
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        "code_execution"
    }

    fn description(&self) -> &str {
        "Execute a shell command. Long-running commands are automatically backgrounded; poll them with process_control."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "background": { "type": "boolean" },
                "timeout_sec": { "type": "integer" },
                "workdir": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let req: ExecRequest = match serde_json::from_value(args) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("invalid code_execution arguments: {e}")),
        };

        if self.security.is_denied(&req.command) {
            if self.security.audit_log {
                tracing::warn!(command = %req.command, "code_execution denied by security policy");
            }
            return ToolResult::err(format!("command denied by security policy: {}", req.command));
        }
        if self.security.audit_log {
            tracing::info!(command = %req.command, "code_execution invoked");
        }

        let response = exec(&self.manager, req).await;
        ToolResult::ok(serde_json::to_string(&response).unwrap_or_default())
    }
}

pub struct ProcessControlTool {
    manager: Arc<ProcessManager>,
}

impl ProcessControlTool {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ProcessControlTool {
    fn name(&self) -> &str {
        "process_control"
    }

    fn description(&self) -> &str {
        "Inspect or control a background process session started by code_execution (list/poll/log/write/kill/clear/remove)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"] },
                "session_id": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    fn required_tools(&self) -> &[String] {
        static REQ: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
        REQ.get_or_init(|| vec!["code_execution".to_string()])
    }

    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let req: ProcessRequest = match serde_json::from_value(args) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("invalid process_control arguments: {e}")),
        };

        let response = handle_process(&self.manager, req).await;
        if response.success {
            ToolResult::ok(serde_json::to_string(&response).unwrap_or_default())
        } else {
            ToolResult::err(response.error.unwrap_or_else(|| "process_control failed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::config::ExecConfig;

    fn manager() -> Arc<ProcessManager> {
        Arc::new(ProcessManager::new(ExecConfig::default()))
    }

    #[tokio::test]
    async fn denied_command_is_rejected() {
        let security = ExecSecurityConfig {
            audit_log: false,
            denied_patterns: vec![r"rm\s+-rf\s+/".into()],
        };
        let tool = CodeExecutionTool::new(manager(), &security);
        let result = tool.execute(serde_json::json!({"command": "rm -rf /"})).await;
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn harmless_command_runs() {
        let security = ExecSecurityConfig {
            audit_log: false,
            denied_patterns: vec![],
        };
        let tool = CodeExecutionTool::new(manager(), &security);
        let result = tool.execute(serde_json::json!({"command": "echo hi"})).await;
        assert!(result.output.is_some());
    }

    #[tokio::test]
    async fn process_control_list_is_empty_initially() {
        let tool = ProcessControlTool::new(manager());
        let result = tool.execute(serde_json::json!({"action": "list"})).await;
        assert!(result.output.unwrap().contains("\"count\":0"));
    }
}
