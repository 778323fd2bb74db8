//! Transport abstraction over upstream chat services.
//!
//! Each wire adapter classifies its failures into [`TransportError`] at the
//! boundary, so the fallback logic above it matches on typed kinds instead
//! of sniffing strings. The substring heuristic in [`is_quota_text`] exists
//! for upstreams whose error bodies are genuinely unstructured; adapters
//! with structured errors do not use it.

use async_trait::async_trait;
use std::time::Duration;

/// Longest error body carried into an error value.
const MAX_ERROR_BODY: usize = 300;

/// Lowercase phrases that mark an unstructured error body as quota
/// exhaustion rather than a generic failure.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
    "requests per day",
    "daily limit",
];

/// Message role in a chat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the prompt sent upstream.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Successful upstream response.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub text: String,
    /// Total tokens consumed, when the upstream reports usage.
    pub tokens_used: Option<u64>,
}

/// Classified failure produced at the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Upstream says the model's quota is spent. Not a health failure.
    #[error("quota exhausted: {0}")]
    Quota(String),

    /// Non-quota HTTP error status.
    #[error("upstream status {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The bounded deadline elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream replied with a body the adapter could not interpret.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn is_quota(&self) -> bool {
        matches!(self, TransportError::Quota(_))
    }

    /// Short kind name for logs and request records.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Quota(_) => "quota",
            TransportError::Http { .. } => "http",
            TransportError::Network(_) => "network",
            TransportError::Timeout(_) => "timeout",
            TransportError::Malformed(_) => "malformed",
        }
    }
}

/// A single upstream call: prompt in, text out.
///
/// Implementations own the wire protocol. They classify every failure into
/// [`TransportError`] and never panic across this boundary.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<TransportReply, TransportError>;
}

/// Whether an unstructured error body reads as quota exhaustion.
pub(crate) fn is_quota_text(body: &str) -> bool {
    let lower = body.to_lowercase();
    QUOTA_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Map a non-success HTTP status to a transport error. 429 is always
/// quota; everything else stays a plain HTTP error here.
pub(crate) fn status_error(status: u16, body: &str) -> TransportError {
    if status == 429 {
        TransportError::Quota(truncate_body(body))
    } else {
        TransportError::Http {
            status,
            body: truncate_body(body),
        }
    }
}

/// Map a reqwest failure to a transport error.
pub(crate) fn request_error(err: reqwest::Error, deadline: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(deadline)
    } else if err.is_decode() {
        TransportError::Malformed(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Cap an error body so log lines and error values stay bounded.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}...", cut)
    }
}
