//! Runtime support for the HTTP/WebSocket surface: the cancellation map and
//! the agent execution loop.

pub mod agent_loop;
pub mod cancel;

pub use agent_loop::{AgentLoop, AgentOutcome};
pub use cancel::{CancelMap, CancelToken};
