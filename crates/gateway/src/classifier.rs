//! Classifier (spec.md §4.F) — hybrid rule + keyword scoring deciding
//! direct-response ("chat") vs. agentic handling.

use sa_domain::config::ClassifierConfig;
use sa_domain::trace::TraceEvent;

/// Leading UI echoes the source chat widget prepends to the first prompt
/// of a turn; stripped before scoring so they don't skew keyword tallies.
const UI_ECHO_PREFIXES: &[&str] = &[
    "what would you like to do next?",
    "how can i help you today?",
];

const CHAT_PATTERNS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "bye", "goodbye", "who are you",
];

const AGENT_KEYWORDS: &[&str] = &[
    "build", "analyze", "scrape", "fetch", "search", "create", "write", "implement",
    "deploy", "refactor", "debug", "investigate", "research", "compile", "download",
    "automate", "generate", "extract", "summarize",
];

/// Multi-step connector words — their presence nudges a prompt toward the
/// agentic path even when it's short.
const STEP_CONNECTORS: &[&str] = &["then", "finally", "afterwards", "next,", "once done"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Chat,
    Agent,
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub kind: Kind,
    pub chat_score: f64,
    pub agent_score: f64,
}

pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Pure function of `prompt` (R3: same input always yields the same
    /// `kind`).
    pub fn classify(&self, conversation_id: &str, prompt: &str) -> Classification {
        let stripped = strip_ui_echo(prompt);
        let lower = stripped.to_lowercase();

        let chat_score = chat_score(&lower);
        let agent_score = agent_score(&lower);

        let kind = if chat_score >= self.config.chat_threshold {
            Kind::Chat
        } else if agent_score >= self.config.agent_threshold {
            Kind::Agent
        } else {
            short_prompt_fallback(&lower, self.config.short_prompt_tokens)
        };

        let classification = Classification {
            kind,
            chat_score,
            agent_score,
        };

        TraceEvent::ClassifierDecision {
            conversation_id: conversation_id.to_owned(),
            route: match kind {
                Kind::Chat => "chat".to_owned(),
                Kind::Agent => "agent".to_owned(),
            },
            score: match kind {
                Kind::Chat => chat_score,
                Kind::Agent => agent_score,
            },
        }
        .emit();

        classification
    }
}

fn strip_ui_echo(prompt: &str) -> &str {
    let trimmed = prompt.trim_start();
    for prefix in UI_ECHO_PREFIXES {
        if trimmed.to_lowercase().starts_with(prefix) {
            return trimmed[prefix.len()..].trim_start();
        }
    }
    trimmed
}

fn chat_score(lower: &str) -> f64 {
    let hits = CHAT_PATTERNS.iter().filter(|p| contains_word(lower, p)).count();
    if hits == 0 {
        return 0.0;
    }
    (0.6 + 0.15 * (hits - 1) as f64).min(1.0)
}

fn agent_score(lower: &str) -> f64 {
    let hits = AGENT_KEYWORDS.iter().filter(|k| contains_word(lower, k)).count();
    let connector_hits = STEP_CONNECTORS.iter().filter(|c| lower.contains(*c)).count();
    if hits == 0 && connector_hits == 0 {
        return 0.0;
    }
    (0.2 * hits as f64 + 0.15 * connector_hits as f64).min(1.0)
}

fn short_prompt_fallback(lower: &str, short_prompt_tokens: usize) -> Kind {
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    if tokens.len() > short_prompt_tokens {
        return Kind::Agent;
    }
    let has_agentic_keyword = AGENT_KEYWORDS.iter().any(|k| contains_word(lower, k))
        || STEP_CONNECTORS.iter().any(|c| lower.contains(*c));
    if has_agentic_keyword {
        Kind::Agent
    } else {
        Kind::Chat
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.contains(' ') {
        return haystack.contains(needle);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(ClassifierConfig::default())
    }

    #[test]
    fn greeting_classifies_as_chat() {
        let c = classifier();
        let result = c.classify("c1", "hi");
        assert_eq!(result.kind, Kind::Chat);
    }

    #[test]
    fn explicit_agent_keyword_classifies_as_agent() {
        let c = classifier();
        let result = c.classify("c1", "scrape the latest prices from this site");
        assert_eq!(result.kind, Kind::Agent);
    }

    #[test]
    fn multi_step_connectors_push_toward_agent() {
        let c = classifier();
        let result = c.classify(
            "c1",
            "open the page, extract the table, then summarize it, finally save a report",
        );
        assert_eq!(result.kind, Kind::Agent);
    }

    #[test]
    fn short_ambiguous_prompt_defaults_to_chat() {
        let c = classifier();
        let result = c.classify("c1", "what's up");
        assert_eq!(result.kind, Kind::Chat);
    }

    #[test]
    fn long_ambiguous_prompt_defaults_to_agent() {
        let c = classifier();
        let words = "lorem ipsum dolor sit amet ".repeat(5); // well over 20 tokens
        let result = c.classify("c1", &words);
        assert_eq!(result.kind, Kind::Agent);
    }

    #[test]
    fn ui_echo_prefix_is_stripped_before_scoring() {
        let c = classifier();
        let with_echo = c.classify("c1", "What would you like to do next? hi");
        let without_echo = c.classify("c1", "hi");
        assert_eq!(with_echo.kind, without_echo.kind);
    }

    #[test]
    fn classification_is_pure() {
        let c = classifier();
        let a = c.classify("c1", "build me a scraper then email the results");
        let b = c.classify("c1", "build me a scraper then email the results");
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.chat_score, b.chat_score);
        assert_eq!(a.agent_score, b.agent_score);
    }
}
