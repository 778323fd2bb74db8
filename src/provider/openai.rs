//! OpenAI-compatible chat completions adapter.
//!
//! Speaks the `/chat/completions` wire shape used by Groq, OpenRouter and
//! the HuggingFace router. These upstreams report quota problems in
//! loosely structured error bodies, so non-429 classification falls back
//! to the shared quota-text heuristic.

use async_trait::async_trait;
use reqwest::header;
use std::time::Duration;

use super::transport::{
    is_quota_text, request_error, status_error, truncate_body, ChatMessage, ChatTransport, Role,
    TransportError, TransportReply,
};
use crate::config::ApiKey;

pub struct OpenAiTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<ApiKey>,
    timeout: Duration,
}

impl OpenAiTransport {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<ApiKey>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": model,
            "messages": wire_messages(messages),
            "max_tokens": max_tokens,
        });

        let mut request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(&body);

        if let Some(api_key) = &self.api_key {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", api_key.expose_secret()),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &error_body));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| request_error(e, self.timeout))?;
        parse_reply(&value)
    }
}

/// 429 is always quota. Other statuses are quota only when the error body
/// says so; these upstreams bury quota detail in free text.
fn classify_error(status: u16, body: &str) -> TransportError {
    if status != 429 && is_quota_text(body) {
        return TransportError::Quota(truncate_body(body));
    }
    status_error(status, body)
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": role_str(m.role),
                "content": m.text,
            })
        })
        .collect()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_reply(value: &serde_json::Value) -> Result<TransportReply, TransportError> {
    let text = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| {
            TransportError::Malformed("response has no choices[0].message.content".to_string())
        })?;

    let tokens_used = value
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|v| v.as_u64());

    Ok(TransportReply {
        text: text.to_string(),
        tokens_used,
    })
}
