//! Shared application state handed to every HTTP/WebSocket handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sa_browser::BrowserPipeline;
use sa_conversations::ConversationManager;
use sa_domain::config::Config;
use sa_domain::oracle::Oracle;
use sa_domain::timeline::TimelineHandle;
use sa_tools::registry::ToolRegistry;

use crate::api::health::HealthRateLimiter;
use crate::classifier::Classifier;
use crate::runtime::{AgentLoop, CancelMap};
use crate::timeline::Broadcaster;

/// Everything a request handler needs, cloned cheaply via `Arc` fields.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversations: Arc<ConversationManager>,
    pub tool_registry: Arc<ToolRegistry>,
    pub browser_pipeline: Arc<BrowserPipeline>,
    pub classifier: Arc<Classifier>,
    pub broadcaster: Arc<Broadcaster>,
    pub cancel_map: Arc<CancelMap>,
    pub agent_loop: Arc<AgentLoop>,
    /// Most recent turn's timeline per conversation, keyed by
    /// `conversation_id`. Timelines are per-turn and in-memory only — they
    /// are not part of the conversation's persisted `messages.json` tree.
    pub timelines: Arc<Mutex<HashMap<String, TimelineHandle>>>,
    pub health_rate_limiter: Arc<HealthRateLimiter>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        conversations: Arc<ConversationManager>,
        tool_registry: Arc<ToolRegistry>,
        browser_pipeline: Arc<BrowserPipeline>,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        let classifier = Arc::new(Classifier::new(config.classifier.clone()));
        let broadcaster = Arc::new(Broadcaster::new());
        let cancel_map = Arc::new(CancelMap::new());
        let agent_loop = Arc::new(AgentLoop::new(oracle, tool_registry.clone()));

        Self {
            config,
            conversations,
            tool_registry,
            browser_pipeline,
            classifier,
            broadcaster,
            cancel_map,
            agent_loop,
            timelines: Arc::new(Mutex::new(HashMap::new())),
            health_rate_limiter: Arc::new(HealthRateLimiter::new()),
        }
    }
}
