//! `Tool`-trait wrappers exposing the browser pipeline and a lightweight
//! HTTP-only search to the agent loop's tool registry (spec.md §4.E).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sa_domain::tool::ToolResult;
use sa_tools::registry::Tool;

use crate::driver::BrowserDriver;
use crate::navigation::navigate_agentically;
use crate::pipeline::BrowserPipeline;

/// Default `max_depth` per spec.md §4.E.
const DEFAULT_MAX_DEPTH: usize = 3;

/// Fetches and extracts the visible text of a page through the full
/// retry-ladder pipeline. Registered under `browser_fetch`.
pub struct BrowserFetchTool {
    pipeline: Arc<BrowserPipeline>,
}

impl BrowserFetchTool {
    pub fn new(pipeline: Arc<BrowserPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Tool for BrowserFetchTool {
    fn name(&self) -> &str {
        "browser_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its visible text, with anti-detection \
         retries and a search-based fallback if every browser tier fails."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute URL to fetch" },
                "conversation_id": {
                    "type": "string",
                    "description": "Conversation id, used only for trace correlation"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required field \"url\"");
        };
        let conversation_id = args
            .get("conversation_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        match self.pipeline.fetch(conversation_id, url).await {
            Ok(outcome) => ToolResult::ok(outcome.content),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

/// Drives multi-page agentic navigation (spec.md §4.E: "collect info from
/// URL X about query Q") against the browser pipeline's primary driver.
/// Registered under `navigate_agentically`.
pub struct AgenticNavigateTool {
    driver: Arc<dyn BrowserDriver>,
}

impl AgenticNavigateTool {
    pub fn new(pipeline: Arc<BrowserPipeline>) -> Self {
        Self {
            driver: pipeline.primary_driver(),
        }
    }
}

#[async_trait]
impl Tool for AgenticNavigateTool {
    fn name(&self) -> &str {
        "navigate_agentically"
    }

    fn description(&self) -> &str {
        "Starting from a URL, repeatedly extract page text and follow the \
         most promising link/button/field to collect information relevant \
         to a query, stopping once coverage is high enough or a depth/page \
         limit is hit."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute URL to start from" },
                "query": { "type": "string", "description": "What to look for" },
                "max_depth": {
                    "type": "integer",
                    "description": "Maximum navigation depth (default 3)"
                }
            },
            "required": ["url", "query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required field \"url\"");
        };
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required field \"query\"");
        };
        let max_depth = args
            .get("max_depth")
            .and_then(|v| v.as_u64())
            .map(|d| d as usize)
            .unwrap_or(DEFAULT_MAX_DEPTH);

        let session = match self.driver.new_session(None).await {
            Ok(s) => s,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let outcome = navigate_agentically(self.driver.as_ref(), session, url, query, max_depth).await;
        self.driver.close_session(session).await;

        match outcome {
            Ok(state) => {
                let pages: Vec<serde_json::Value> = state
                    .collected_pages
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "locator": p.locator,
                            "coverage": p.coverage,
                            "text": p.text,
                        })
                    })
                    .collect();
                ToolResult::ok(
                    serde_json::json!({
                        "depth_reached": state.depth,
                        "pages_collected": state.collected_pages.len(),
                        "pages": pages,
                    })
                    .to_string(),
                )
            }
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

/// A plain HTTP search (no headless browser involved, deliberately — it's
/// what the pipeline's tier-6 degradation falls back to, so it must not
/// itself depend on `BrowserPipeline` or a tier-6 failure would recurse).
/// Registered under `web_search`.
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let response = self
            .client
            .get("https://duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(extract_snippets(&body))
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for a short query and return the top result snippets."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search terms" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required field \"query\"");
        };
        match self.search(query).await {
            Ok(snippet) => ToolResult::ok(snippet),
            Err(e) => ToolResult::err(e),
        }
    }
}

fn extract_snippets(html: &str) -> String {
    let snippet_re = Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#)
        .expect("static regex is valid");
    let tag_re = Regex::new(r"<[^>]+>").expect("static regex is valid");

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .take(3)
        .map(|cap| tag_re.replace_all(&cap[1], "").trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect();

    if snippets.is_empty() {
        "no results found".to_owned()
    } else {
        snippets.join(" | ")
    }
}
