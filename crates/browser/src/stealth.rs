//! Constants shared by every tier of the retry ladder: the stealth injection
//! script and the anti-scraping pattern table used to decide whether a
//! failure is "just an error" or "the site is onto us".

/// Injected via the driver's "evaluate on new document" hook on first use of
/// a session, before any navigation happens. Patches the handful of signals
/// naive bot-detection scripts check first.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
  Object.defineProperty(navigator, 'webdriver', { get: () => false });
  Object.defineProperty(navigator, 'plugins', {
    get: () => [1, 2, 3, 4, 5].map(() => ({ name: 'Chrome PDF Plugin' })),
  });
  Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
  Object.defineProperty(screen, 'width', { get: () => 1920 });
  Object.defineProperty(screen, 'height', { get: () => 1080 });
  Object.defineProperty(screen, 'availWidth', { get: () => 1920 });
  Object.defineProperty(screen, 'availHeight', { get: () => 1040 });
  const origQuery = window.navigator.permissions.query;
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : origQuery(parameters);
})();
"#;

/// Case-insensitive substrings that indicate the page returned is a block
/// page rather than content: a captcha wall, a Cloudflare interstitial, a
/// rate-limit response, etc. Checked against both the page title/body text
/// and navigation error messages.
pub const ANTI_SCRAPING_PATTERNS: &[&str] = &[
    "captcha",
    "cloudflare",
    "403",
    "forbidden",
    "rate limit",
    "too many requests",
    "access denied",
    "blocked",
    "unusual traffic",
    "verify you are human",
];

/// True if `text` contains any anti-scraping marker, matched case-insensitively.
pub fn looks_like_block_page(text: &str) -> bool {
    let lower = text.to_lowercase();
    ANTI_SCRAPING_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Selectors scanned for by the captcha detector, grounded in the closed
/// pattern list the source's detector JS checks for.
pub const CAPTCHA_SELECTORS: &[&str] = &[
    ".g-recaptcha",
    "iframe[src*='recaptcha']",
    "iframe[src*='hcaptcha']",
    "#cf-challenge-stage",
    ".cf-browser-verification",
];

/// Default pool of plausible desktop User-Agent strings rotated between
/// tiers. Configurable via `BrowserConfig::user_agents`; this is only the
/// built-in fallback when the config's own pool is empty.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_markers_case_insensitively() {
        assert!(looks_like_block_page("Please complete the CAPTCHA to continue"));
        assert!(looks_like_block_page("403 Forbidden"));
        assert!(looks_like_block_page("Checking your browser — Cloudflare"));
    }

    #[test]
    fn ordinary_page_text_is_not_flagged() {
        assert!(!looks_like_block_page("Welcome to our blog about sourdough bread"));
    }
}
