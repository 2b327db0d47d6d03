use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use sa_browser::{
    AgenticNavigateTool, BrowserPipeline, ChromiumoxideDriver, HeadlessChromeDriver, UnavailableDriver,
    WebSearchTool,
};
use sa_conversations::ConversationManager;
use sa_domain::config::{Config, ConfigSeverity};
use sa_gateway::cli::{self, Cli};
use sa_gateway::oracle::HttpOracle;
use sa_gateway::state::AppState;
use sa_gateway::api;
use sa_tools::builtin::{CodeExecutionTool, FileOperationTool, ProcessControlTool, TerminateTool};
use sa_tools::registry::{Tool, ToolRegistry};
use sa_tools::ProcessManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let (config, config_path) = cli::load_config().context("loading configuration")?;
    let config = cli::apply_overrides(config, &cli);

    tracing::info!(config_path = %config_path, "Nexagent starting");
    run_server(Arc::new(config)).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    std::fs::create_dir_all(&config.workspace.data_root).context("creating data root")?;
    let conversations = Arc::new(ConversationManager::new(config.workspace.data_root.clone()));

    // ── Tool registry ────────────────────────────────────────────────
    let processes = Arc::new(ProcessManager::new(config.tools.exec.clone()));
    let registry = ToolRegistry::new();
    registry
        .register(Arc::new(CodeExecutionTool::new(processes.clone(), &config.tools.exec_security)))
        .context("registering code_execution tool")?;
    registry
        .register(Arc::new(ProcessControlTool::new(processes.clone())))
        .context("registering process_control tool")?;
    registry
        .register(Arc::new(FileOperationTool::new(config.workspace.data_root.clone())))
        .context("registering file_operation tool")?;
    registry.register(Arc::new(TerminateTool)).context("registering terminate tool")?;

    let search_tool: Arc<dyn Tool> = Arc::new(WebSearchTool::new());
    registry.register(search_tool.clone()).context("registering web_search tool")?;

    // ── Browser pipeline ─────────────────────────────────────────────
    let primary: Arc<dyn sa_browser::BrowserDriver> = match ChromiumoxideDriver::launch().await {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            tracing::warn!(error = %e, "chromiumoxide unavailable, degrading to headless_chrome");
            Arc::new(UnavailableDriver::new("chromiumoxide"))
        }
    };
    let fallback: Arc<dyn sa_browser::BrowserDriver> = match HeadlessChromeDriver::launch() {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            tracing::warn!(error = %e, "headless_chrome unavailable, browser tiers will degrade to search");
            Arc::new(UnavailableDriver::new("headless_chrome"))
        }
    };
    let browser_pipeline = Arc::new(BrowserPipeline::new(
        primary,
        fallback,
        config.browser.clone(),
        None,
        search_tool,
    ));
    registry
        .register(Arc::new(sa_browser::BrowserFetchTool::new(browser_pipeline.clone())))
        .context("registering browser_fetch tool")?;
    registry
        .register(Arc::new(AgenticNavigateTool::new(browser_pipeline.clone())))
        .context("registering navigate_agentically tool")?;

    // ── Oracle ───────────────────────────────────────────────────────
    let oracle: Arc<dyn sa_domain::oracle::Oracle> = Arc::new(HttpOracle::from_env());

    let state = AppState::new(config.clone(), conversations, Arc::new(registry), browser_pipeline, oracle);

    // ── Periodic broadcaster maintenance ─────────────────────────────
    let tick_broadcaster = state.broadcaster.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
        loop {
            interval.tick().await;
            tick_broadcaster.tick();
        }
    });

    // ── CORS ─────────────────────────────────────────────────────────
    let cors = build_cors_layer(&config.server.cors);

    let app = api::router().layer(cors).with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await.context("binding listener")?;
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await
        .context("serving")?;

    Ok(())
}

fn build_cors_layer(cors: &sa_domain::config::CorsConfig) -> CorsLayer {
    if cors.allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods([Method::GET, Method::POST]);
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
}
