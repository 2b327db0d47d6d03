//! Browser Pipeline (spec.md §4.E) — the retry ladder with escalating
//! mitigation, plus the graceful terminal fallback to a search tool.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use sa_domain::config::BrowserConfig;
use sa_domain::trace::TraceEvent;
use sa_tools::registry::Tool;
use thiserror::Error;

use crate::captcha::{self, CaptchaKind, CaptchaOutcome, SolverConfig};
use crate::driver::{BrowserDriver, DriverError, SessionId};
use crate::stealth::{looks_like_block_page, DEFAULT_USER_AGENTS, STEALTH_SCRIPT};
use crate::telemetry::Telemetry;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("search fallback failed: {0}")]
    SearchFallback(String),
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub content: String,
    pub tier: u8,
    pub driver_used: String,
    /// True once the result came from the search-tool degradation (tier 6)
    /// rather than a real page fetch — downstream logic distinguishes via
    /// the `[BROWSER FALLBACK]` marker already present in `content`, this
    /// flag just saves re-parsing it.
    pub fallback: bool,
}

/// Drives one or more `BrowserDriver`s through the six-tier retry ladder.
/// Holds no conversation-specific state — one pipeline instance is shared
/// across all conversations, same as the teacher's pooled-resource pattern.
pub struct BrowserPipeline {
    primary: Arc<dyn BrowserDriver>,
    fallback: Arc<dyn BrowserDriver>,
    config: BrowserConfig,
    telemetry: Telemetry,
    solver: Option<SolverConfig>,
    search_tool: Arc<dyn Tool>,
}

impl BrowserPipeline {
    pub fn new(
        primary: Arc<dyn BrowserDriver>,
        fallback: Arc<dyn BrowserDriver>,
        config: BrowserConfig,
        solver: Option<SolverConfig>,
        search_tool: Arc<dyn Tool>,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
            telemetry: Telemetry::new(),
            solver,
            search_tool,
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// The primary driver, shared with `AgenticNavigateTool` so multi-page
    /// navigation (spec.md §4.E) runs against the same browser backend as
    /// tiers 1-4 of the retry ladder.
    pub fn primary_driver(&self) -> Arc<dyn BrowserDriver> {
        self.primary.clone()
    }

    fn random_user_agent(&self) -> String {
        if self.config.user_agents.is_empty() {
            DEFAULT_USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(DEFAULT_USER_AGENTS[0])
                .to_owned()
        } else {
            self.config
                .user_agents
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(|| self.config.user_agents[0].clone())
        }
    }

    async fn random_delay(&self) {
        let (lo, hi) = self.config.delay_window_ms;
        let ms = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn prepare_session(
        &self,
        driver: &dyn BrowserDriver,
        proxy: Option<&str>,
    ) -> Result<SessionId, DriverError> {
        let session = driver.new_session(proxy).await?;
        driver
            .set_user_agent(session, &self.random_user_agent())
            .await?;
        driver
            .inject_on_new_document(session, STEALTH_SCRIPT)
            .await?;
        Ok(session)
    }

    /// Navigate and extract as a single timed unit (tiers 1/2/4), flagging
    /// both timeouts and anti-scraping block pages as failures.
    async fn navigate_and_extract(
        &self,
        driver: &dyn BrowserDriver,
        session: SessionId,
        url: &str,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        let started = std::time::Instant::now();
        let outcome = match tokio::time::timeout(timeout, async {
            driver.navigate(session, url).await?;
            driver.extract_text(session).await
        })
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(DriverError::Navigation("timed out".into())),
        };

        let ok = matches!(&outcome, Ok(text) if !looks_like_block_page(text));
        self.telemetry
            .record("navigate_and_extract", ok, started.elapsed());

        match outcome {
            Ok(text) if looks_like_block_page(&text) => {
                Err(DriverError::Navigation("anti-scraping marker detected".into()))
            }
            other => other,
        }
    }

    /// Tier 3: navigate and extract as two independent calls, in case only
    /// one sub-step was the actual point of failure.
    async fn navigate_then_extract_split(
        &self,
        driver: &dyn BrowserDriver,
        session: SessionId,
        url: &str,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        let nav_started = std::time::Instant::now();
        let nav_result = tokio::time::timeout(timeout, driver.navigate(session, url)).await;
        let nav_ok = matches!(nav_result, Ok(Ok(())));
        self.telemetry.record("navigate", nav_ok, nav_started.elapsed());
        match nav_result {
            Ok(inner) => inner?,
            Err(_) => return Err(DriverError::Navigation("timed out".into())),
        }

        let extract_started = std::time::Instant::now();
        let extract_result = tokio::time::timeout(timeout, driver.extract_text(session)).await;
        let ok = matches!(&extract_result, Ok(Ok(text)) if !looks_like_block_page(text));
        self.telemetry
            .record("extract_text", ok, extract_started.elapsed());
        let text = match extract_result {
            Ok(inner) => inner?,
            Err(_) => return Err(DriverError::Extraction("timed out".into())),
        };
        if looks_like_block_page(&text) {
            return Err(DriverError::Extraction(
                "anti-scraping marker detected".into(),
            ));
        }
        Ok(text)
    }

    /// Run tiers 1 through 4 of the ladder against a single driver.
    async fn run_driver_tiers(
        &self,
        driver: &dyn BrowserDriver,
        url: &str,
        conversation_id: &str,
    ) -> Result<(String, u8), DriverError> {
        let base_timeout = Duration::from_secs(self.config.nav_timeout_sec.max(1));
        let mut proxies = self.config.proxy_pool.iter();

        let mut session = self.prepare_session(driver, proxies.next().map(String::as_str)).await?;
        self.random_delay().await;

        let tier1 = self
            .navigate_and_extract(driver, session, url, base_timeout)
            .await;
        emit_tier(conversation_id, 1, tier1.is_ok());
        if let Ok(text) = tier1 {
            driver.close_session(session).await;
            return Ok((text, 1));
        }

        driver.set_user_agent(session, &self.random_user_agent()).await.ok();
        let tier2_timeout = base_timeout * 2;
        let tier2 = self
            .navigate_and_extract(driver, session, url, tier2_timeout)
            .await;
        emit_tier(conversation_id, 2, tier2.is_ok());
        if let Ok(text) = tier2 {
            driver.close_session(session).await;
            return Ok((text, 2));
        }

        let tier3 = self
            .navigate_then_extract_split(driver, session, url, tier2_timeout)
            .await;
        emit_tier(conversation_id, 3, tier3.is_ok());
        if let Ok(text) = tier3 {
            driver.close_session(session).await;
            return Ok((text, 3));
        }

        driver.close_session(session).await;
        session = self
            .prepare_session(driver, proxies.next().map(String::as_str))
            .await?;
        let tier4 = self
            .navigate_and_extract(driver, session, url, base_timeout)
            .await;

        let result = match tier4 {
            Ok(text) => Ok((text, 4)),
            Err(e) => self.retry_past_captcha(driver, session, url, base_timeout, e).await,
        };
        emit_tier(conversation_id, 4, result.is_ok());
        driver.close_session(session).await;
        result
    }

    /// If the tier-4 failure looks like a captcha/challenge, try clearing
    /// it in place (spec.md §4.E's captcha sub-state-machine) before
    /// giving up on this driver.
    async fn retry_past_captcha(
        &self,
        driver: &dyn BrowserDriver,
        session: SessionId,
        url: &str,
        timeout: Duration,
        original_err: DriverError,
    ) -> Result<(String, u8), DriverError> {
        let Ok(kind) = captcha::detect(driver, session).await else {
            return Err(original_err);
        };
        if kind == CaptchaKind::None {
            return Err(original_err);
        }
        match captcha::handle(driver, session, kind, self.solver.as_ref()).await {
            CaptchaOutcome::Solved | CaptchaOutcome::Waited => self
                .navigate_and_extract(driver, session, url, timeout)
                .await
                .map(|text| (text, 4)),
            _ => Err(original_err),
        }
    }

    /// Top-level contract: tiers 1-4 on the primary driver, tier 5 on the
    /// fallback driver, tier 6 degrading to the search tool.
    pub async fn fetch(
        &self,
        conversation_id: &str,
        url: &str,
    ) -> Result<FetchOutcome, PipelineError> {
        if let Ok((content, tier)) = self
            .run_driver_tiers(self.primary.as_ref(), url, conversation_id)
            .await
        {
            return Ok(FetchOutcome {
                content,
                tier,
                driver_used: self.primary.name().to_owned(),
                fallback: false,
            });
        }

        let tier5 = self
            .run_driver_tiers(self.fallback.as_ref(), url, conversation_id)
            .await;
        emit_tier(conversation_id, 5, tier5.is_ok());
        if let Ok((content, _)) = tier5 {
            return Ok(FetchOutcome {
                content,
                tier: 5,
                driver_used: self.fallback.name().to_owned(),
                fallback: false,
            });
        }

        self.search_fallback(conversation_id, url).await
    }

    async fn search_fallback(
        &self,
        conversation_id: &str,
        url: &str,
    ) -> Result<FetchOutcome, PipelineError> {
        let domain = extract_domain(url);
        let query = format!("information from {domain}");
        let args = serde_json::json!({ "query": query });
        let result = self.search_tool.execute(args).await;
        emit_tier(conversation_id, 6, !result.is_error());

        match result.output {
            Some(output) => Ok(FetchOutcome {
                content: format!("[BROWSER FALLBACK] {output}"),
                tier: 6,
                driver_used: "search".to_owned(),
                fallback: true,
            }),
            None => Err(PipelineError::SearchFallback(
                result
                    .error
                    .unwrap_or_else(|| "search tool produced no output".into()),
            )),
        }
    }
}

fn emit_tier(conversation_id: &str, tier: u8, ok: bool) {
    TraceEvent::BrowserTierAttempt {
        conversation_id: conversation_id.to_owned(),
        tier: tier.to_string(),
        ok,
    }
    .emit();
}

fn extract_domain(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverResult, InteractiveElement};
    use async_trait::async_trait;
    use sa_domain::config::BrowserConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn extract_domain_strips_scheme_and_path() {
        assert_eq!(extract_domain("https://example.com/a/b?q=1"), "example.com");
        assert_eq!(extract_domain("example.org"), "example.org");
    }

    /// A driver whose `navigate`/`extract_text` fail a fixed number of
    /// times before succeeding, so tests can drive the ladder's tier
    /// transitions deterministically without a real browser.
    struct ScriptedDriver {
        name: &'static str,
        fail_until_call: u32,
        calls: AtomicU32,
    }

    impl ScriptedDriver {
        fn new(name: &'static str, fail_until_call: u32) -> Self {
            Self { name, fail_until_call, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl BrowserDriver for ScriptedDriver {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn new_session(&self, _proxy: Option<&str>) -> DriverResult<SessionId> {
            Ok(SessionId::next_for_test())
        }
        async fn close_session(&self, _session: SessionId) {}

        async fn set_user_agent(&self, _session: SessionId, _user_agent: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn inject_on_new_document(&self, _session: SessionId, _script: &str) -> DriverResult<()> {
            Ok(())
        }

        async fn navigate(&self, _session: SessionId, _url: &str) -> DriverResult<()> {
            Ok(())
        }

        async fn extract_text(&self, _session: SessionId) -> DriverResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_until_call {
                Err(DriverError::Extraction("timed out".into()))
            } else {
                Ok("OK".into())
            }
        }

        async fn find_interactive_elements(
            &self,
            _session: SessionId,
        ) -> DriverResult<Vec<InteractiveElement>> {
            Ok(Vec::new())
        }
        async fn click(&self, _session: SessionId, _selector: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn fill(&self, _session: SessionId, _selector: &str, _value: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn scroll(&self, _session: SessionId) -> DriverResult<()> {
            Ok(())
        }
        async fn detect_selectors(&self, _session: SessionId, _selectors: &[&str]) -> DriverResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    /// Always reports the target unreachable, forcing the ladder through
    /// every tier and into the tier-6 search fallback.
    struct AlwaysFailingDriver {
        name: &'static str,
    }

    #[async_trait]
    impl BrowserDriver for AlwaysFailingDriver {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn new_session(&self, _proxy: Option<&str>) -> DriverResult<SessionId> {
            Ok(SessionId::next_for_test())
        }
        async fn close_session(&self, _session: SessionId) {}
        async fn set_user_agent(&self, _session: SessionId, _user_agent: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn inject_on_new_document(&self, _session: SessionId, _script: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn navigate(&self, _session: SessionId, _url: &str) -> DriverResult<()> {
            Err(DriverError::Navigation("timed out".into()))
        }
        async fn extract_text(&self, _session: SessionId) -> DriverResult<String> {
            Err(DriverError::Extraction("timed out".into()))
        }
        async fn find_interactive_elements(
            &self,
            _session: SessionId,
        ) -> DriverResult<Vec<InteractiveElement>> {
            Ok(Vec::new())
        }
        async fn click(&self, _session: SessionId, _selector: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn fill(&self, _session: SessionId, _selector: &str, _value: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn scroll(&self, _session: SessionId) -> DriverResult<()> {
            Ok(())
        }
        async fn detect_selectors(&self, _session: SessionId, _selectors: &[&str]) -> DriverResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct StubSearchTool {
        fail: bool,
    }

    #[async_trait]
    impl Tool for StubSearchTool {
        fn name(&self) -> &str {
            "web_search"
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn execute(&self, _args: serde_json::Value) -> sa_domain::tool::ToolResult {
            if self.fail {
                sa_domain::tool::ToolResult::err("no results")
            } else {
                sa_domain::tool::ToolResult::ok("Example Domain summary")
            }
        }
    }

    fn fast_config() -> BrowserConfig {
        let mut config = BrowserConfig::default();
        config.nav_timeout_sec = 1;
        config.delay_window_ms = (0, 0);
        config
    }

    /// Scenario 4 (spec.md §8): three failures on the primary driver's
    /// tiers 1-3, success on tier 4 — never needing the fallback driver.
    #[tokio::test]
    async fn retry_ladder_succeeds_on_fourth_attempt_within_primary_driver() {
        let primary: Arc<dyn BrowserDriver> = Arc::new(ScriptedDriver::new("primary", 3));
        let fallback: Arc<dyn BrowserDriver> = Arc::new(AlwaysFailingDriver { name: "fallback" });
        let search: Arc<dyn Tool> = Arc::new(StubSearchTool { fail: true });

        let pipeline = BrowserPipeline::new(primary, fallback, fast_config(), None, search);
        let outcome = pipeline.fetch("c1", "https://example.com").await.unwrap();

        assert_eq!(outcome.content, "OK");
        assert_eq!(outcome.driver_used, "primary");
        assert!(!outcome.fallback);
    }

    /// B4 / scenario 4's terminal case: every driver tier fails, so the
    /// pipeline degrades to the search tool with the marker prefix.
    #[tokio::test]
    async fn all_tiers_failing_degrades_to_marked_search_fallback() {
        let primary: Arc<dyn BrowserDriver> = Arc::new(AlwaysFailingDriver { name: "primary" });
        let fallback: Arc<dyn BrowserDriver> = Arc::new(AlwaysFailingDriver { name: "fallback" });
        let search: Arc<dyn Tool> = Arc::new(StubSearchTool { fail: false });

        let pipeline = BrowserPipeline::new(primary, fallback, fast_config(), None, search);
        let outcome = pipeline.fetch("c1", "https://example.com/page").await.unwrap();

        assert_eq!(outcome.tier, 6);
        assert!(outcome.fallback);
        assert!(outcome.content.starts_with("[BROWSER FALLBACK]"));
        assert!(outcome.content.contains("Example Domain summary"));
    }

    /// When even the search fallback has nothing, `fetch` surfaces that as
    /// an error rather than fabricating a result.
    #[tokio::test]
    async fn search_fallback_failure_surfaces_as_pipeline_error() {
        let primary: Arc<dyn BrowserDriver> = Arc::new(AlwaysFailingDriver { name: "primary" });
        let fallback: Arc<dyn BrowserDriver> = Arc::new(AlwaysFailingDriver { name: "fallback" });
        let search: Arc<dyn Tool> = Arc::new(StubSearchTool { fail: true });

        let pipeline = BrowserPipeline::new(primary, fallback, fast_config(), None, search);
        let result = pipeline.fetch("c1", "https://example.com").await;

        assert!(matches!(result, Err(PipelineError::SearchFallback(_))));
    }
}
