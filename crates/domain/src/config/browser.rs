use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browser pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning knobs for the browser-fallback retry ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Max concurrent browser sessions held in the pool.
    #[serde(default = "d_max_browsers")]
    pub max_browsers: usize,
    /// Outbound proxy pool, rotated on anti-scraping detection. Empty means
    /// no proxy (direct connection only).
    #[serde(default)]
    pub proxy_pool: Vec<String>,
    /// User-agent pool rotated per session.
    #[serde(default = "d_user_agents")]
    pub user_agents: Vec<String>,
    /// Jitter window between actions, milliseconds (min, max).
    #[serde(default = "d_delay_window_ms")]
    pub delay_window_ms: (u64, u64),
    /// Per-call navigation timeout, seconds.
    #[serde(default = "d_nav_timeout_sec")]
    pub nav_timeout_sec: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_browsers: d_max_browsers(),
            proxy_pool: Vec::new(),
            user_agents: d_user_agents(),
            delay_window_ms: d_delay_window_ms(),
            nav_timeout_sec: d_nav_timeout_sec(),
        }
    }
}

fn d_max_browsers() -> usize {
    4
}

fn d_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
    ]
}

fn d_delay_window_ms() -> (u64, u64) {
    (500, 2000)
}

fn d_nav_timeout_sec() -> u64 {
    30
}
