//! Respond endpoint request and response types.

use serde::{Deserialize, Serialize};

/// Body of `POST /v1/respond`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RespondRequest {
    pub message: String,
    /// Rate limiting applies per caller; anonymous callers are not gated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    /// Conversation continuity key. Each provider keeps its own history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Bypass the cache lookup; a fresh answer still refreshes the entry.
    #[serde(default)]
    pub skip_cache: bool,
    /// Try this provider before the configured priority order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Try this model first within whichever provider serves the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Body of a successful respond.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RespondResponse {
    pub text: String,
    /// Provider that produced (or originally produced, when cached) the text
    pub provider: String,
    pub model: String,
    pub cached: bool,
    pub latency_ms: u64,
}
