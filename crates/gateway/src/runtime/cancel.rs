//! Per-conversation cancellation tokens (spec.md §4.H, §5).
//!
//! Cancellation is cooperative: calling `cancel()` only flips a flag the
//! agent loop checks at the top of its next iteration. An in-flight tool
//! call is allowed to finish or time out; it is never force-killed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token checked by the agent loop on every iteration.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancel token for each conversation currently running
/// an agent loop. One conversation runs at most one loop at a time (the
/// conversation's owning task is the sole writer, per spec.md §5), so a
/// flat map keyed on `conversation_id` is sufficient — no groups needed.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for `conversation_id`, replacing any stale
    /// one left over from a prior run.
    pub fn register(&self, conversation_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(conversation_id.to_owned(), token.clone());
        token
    }

    /// Signal cancellation for a running conversation. Returns `true` if a
    /// token was found (i.e. a loop is believed to be running).
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.tokens.lock().get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the token once the loop that owned it has finished.
    pub fn remove(&self, conversation_id: &str) {
        self.tokens.lock().remove(conversation_id);
    }

    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.tokens.lock().contains_key(conversation_id)
    }
}
