//! Tool Registry & Dispatcher, plus the built-in tools available to the
//! agent loop out of the box: `terminate`, `code_execution`,
//! `process_control`, `file_operation`. `web_search`/browser-backed tools
//! are contributed by `sa-browser`, which depends on this crate.

pub mod builtin;
pub mod dispatcher;
pub mod exec;
pub mod file_ops;
pub mod manager;
pub mod process;
pub mod registry;

pub use dispatcher::{dispatch, DEFAULT_TOOL_TIMEOUT_SEC};
pub use manager::ProcessManager;
pub use registry::{CycleError, Tool, ToolRegistry};
