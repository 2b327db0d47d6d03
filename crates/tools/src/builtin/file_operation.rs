//! `file_operation` built-in tool — a single tool surfacing read/write/
//! append/move/delete/list, each constrained to a workspace root (spec.md
//! §4.I's path-traversal invariant, enforced by `file_ops::validate_path`).

use std::path::PathBuf;

use async_trait::async_trait;
use sa_domain::tool::ToolResult;
use serde::Deserialize;

use crate::file_ops::{
    file_append, file_delete, file_list, file_move, file_read, file_write, FileAppendRequest,
    FileDeleteRequest, FileListRequest, FileMoveRequest, FileReadRequest, FileWriteRequest,
};
use crate::registry::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Read,
    Write,
    Append,
    Move,
    Delete,
    List,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileOperationArgs {
    pub operation: FileOp,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub struct FileOperationTool {
    workspace_root: PathBuf,
}

impl FileOperationTool {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for FileOperationTool {
    fn name(&self) -> &str {
        "file_operation"
    }

    fn description(&self) -> &str {
        "Read, write, append, move, delete, or list files within the conversation's material workspace."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string", "enum": ["read", "write", "append", "move", "delete", "list"] },
                "path": { "type": "string" },
                "content": { "type": "string" },
                "source": { "type": "string" },
                "destination": { "type": "string" },
                "offset": { "type": "integer" },
                "limit": { "type": "integer" }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let parsed: FileOperationArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::err(format!("invalid file_operation arguments: {e}")),
        };

        let result = match parsed.operation {
            FileOp::Read => {
                let Some(path) = parsed.path else {
                    return ToolResult::err("path is required for read".into());
                };
                file_read(
                    &self.workspace_root,
                    FileReadRequest {
                        path,
                        offset: parsed.offset,
                        limit: parsed.limit,
                    },
                )
                .await
            }
            FileOp::Write => {
                let (Some(path), Some(content)) = (parsed.path, parsed.content) else {
                    return ToolResult::err("path and content are required for write".into());
                };
                file_write(&self.workspace_root, FileWriteRequest { path, content }).await
            }
            FileOp::Append => {
                let (Some(path), Some(content)) = (parsed.path, parsed.content) else {
                    return ToolResult::err("path and content are required for append".into());
                };
                file_append(&self.workspace_root, FileAppendRequest { path, content }).await
            }
            FileOp::Move => {
                let (Some(source), Some(destination)) = (parsed.source, parsed.destination) else {
                    return ToolResult::err("source and destination are required for move".into());
                };
                file_move(&self.workspace_root, FileMoveRequest { source, destination }).await
            }
            FileOp::Delete => {
                let Some(path) = parsed.path else {
                    return ToolResult::err("path is required for delete".into());
                };
                file_delete(&self.workspace_root, FileDeleteRequest { path }).await
            }
            FileOp::List => {
                file_list(
                    &self.workspace_root,
                    FileListRequest {
                        path: parsed.path.unwrap_or_else(|| ".".into()),
                    },
                )
                .await
            }
        };

        match result {
            Ok(value) => ToolResult::ok(value.to_string()),
            Err(e) => ToolResult::err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let ws = TempDir::new().unwrap();
        let tool = FileOperationTool::new(ws.path().to_path_buf());

        let write_result = tool
            .execute(serde_json::json!({"operation": "write", "path": "a.txt", "content": "hello"}))
            .await;
        assert!(write_result.output.is_some());

        let read_result = tool
            .execute(serde_json::json!({"operation": "read", "path": "a.txt"}))
            .await;
        assert!(read_result.output.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let ws = TempDir::new().unwrap();
        let tool = FileOperationTool::new(ws.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"operation": "read", "path": "../../etc/passwd"}))
            .await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn missing_required_field_is_error() {
        let ws = TempDir::new().unwrap();
        let tool = FileOperationTool::new(ws.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"operation": "write"})).await;
        assert!(result.is_error());
    }
}
