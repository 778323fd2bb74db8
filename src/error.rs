//! Error types for llmux.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Result type alias for llmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the router.
///
/// Model-level and provider-level failures (quota exhaustion, transport
/// errors, a provider with no usable models) are recovered inside the
/// fallback cascade and never appear here. The caller only ever sees the
/// rate-limit gate, a rejected request, or total exhaustion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Too many requests; retry in {wait_ms} ms")]
    RateLimited { wait_ms: u64 },

    #[error("All providers failed to produce a response")]
    AllProvidersFailed,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            Error::AllProvidersFailed => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        // Return OpenAI-compatible error format
        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": "llmux_error",
                "code": status.as_u16()
            }
        });

        let mut response = (status, axum::Json(body)).into_response();

        // Tell throttled callers when to come back (seconds, rounded up)
        if let Error::RateLimited { wait_ms } = self {
            let secs = wait_ms.div_ceil(1000).max(1);
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
