/// Shared error type used across all Nexagent crates.
///
/// Variants map onto the closed error-kind set: each surfaces on HTTP and/or
/// the agent loop per its own rules (see `sa_gateway::api::error` for the
/// HTTP mapping).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_sec}s")]
    RateLimited { retry_after_sec: u64 },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("dependency: {0}")]
    Dependency(String),

    #[error("tool execution: {0}")]
    ToolExecution(String),

    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
