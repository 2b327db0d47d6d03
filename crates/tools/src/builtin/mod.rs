pub mod code_execution;
pub mod file_operation;
pub mod terminate;

pub use code_execution::{CodeExecutionTool, ProcessControlTool};
pub use file_operation::FileOperationTool;
pub use terminate::{TerminateTool, TERMINATE_TOOL_NAME};
