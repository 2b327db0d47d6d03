//! HTTP mapping for `sa_domain::error::Error` (spec.md §6).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sa_domain::error::Error;
use serde_json::json;

/// Wraps a domain `Error` so handlers can `?`-propagate it and get a JSON
/// body + the right status code for free.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, None),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, None),
            Error::RateLimited { retry_after_sec } => (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after_sec)),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, None),
            Error::Cancelled => (StatusCode::CONFLICT, None),
            Error::Dependency(_) | Error::BrowserUnavailable(_) => (StatusCode::BAD_GATEWAY, None),
            Error::ToolExecution(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let mut body = json!({ "error": self.0.to_string() });
        if let Some(retry_after) = retry_after {
            body["retry_after"] = json!(retry_after);
        }

        (status, Json(body)).into_response()
    }
}
