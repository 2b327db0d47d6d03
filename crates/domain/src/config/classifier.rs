use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Score thresholds for the chat/agent hybrid classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "d_chat_threshold")]
    pub chat_threshold: f64,
    #[serde(default = "d_agent_threshold")]
    pub agent_threshold: f64,
    /// Prompts at or below this token count fall back to the shorter-prompt
    /// heuristic when neither threshold is met.
    #[serde(default = "d_short_prompt_tokens")]
    pub short_prompt_tokens: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            chat_threshold: d_chat_threshold(),
            agent_threshold: d_agent_threshold(),
            short_prompt_tokens: d_short_prompt_tokens(),
        }
    }
}

fn d_chat_threshold() -> f64 {
    0.60
}
fn d_agent_threshold() -> f64 {
    0.40
}
fn d_short_prompt_tokens() -> usize {
    20
}
