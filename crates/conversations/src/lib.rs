//! Conversation & Session Manager — per-conversation folder lifecycle,
//! message persistence, material storage, and rendered output generation.

pub mod message;
pub mod store;

pub use message::{Message, Role};
pub use store::{ConversationManager, ConversationMetadata, MaterialEntry, OutputFormat};
