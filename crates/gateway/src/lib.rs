//! Nexagent gateway — HTTP/WebSocket surface, classifier, direct responder,
//! and agent loop wired together over `sa-domain`/`sa-tools`/`sa-browser`/
//! `sa-conversations`.

pub mod api;
pub mod cli;
pub mod classifier;
pub mod direct_responder;
pub mod oracle;
pub mod runtime;
pub mod state;
pub mod timeline;
