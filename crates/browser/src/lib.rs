//! Browser Pipeline (spec.md §4.E) — stealth-hardened page fetch/extract
//! with an escalating retry ladder, a captcha sub-state-machine, agentic
//! multi-page navigation, and a graceful degrade to web search.

pub mod captcha;
pub mod driver;
pub mod navigation;
pub mod pipeline;
pub mod stealth;
pub mod telemetry;
pub mod tool;

pub use captcha::{CaptchaKind, CaptchaOutcome, SolverConfig};
pub use driver::{
    BrowserDriver, ChromiumoxideDriver, DriverError, DriverResult, ElementKind,
    HeadlessChromeDriver, InteractiveElement, SessionId, UnavailableDriver,
};
pub use navigation::{navigate_agentically, CollectedPage, NavigationState};
pub use pipeline::{BrowserPipeline, FetchOutcome, PipelineError};
pub use telemetry::{MethodStats, Telemetry};
pub use tool::{AgenticNavigateTool, BrowserFetchTool, WebSearchTool};
