//! Gemini `generateContent` wire adapter.
//!
//! Gemini reports quota exhaustion with a structured error status
//! (`RESOURCE_EXHAUSTED`), so no free-text sniffing is needed here.

use async_trait::async_trait;
use reqwest::header;
use std::time::Duration;

use super::transport::{
    request_error, status_error, truncate_body, ChatMessage, ChatTransport, Role, TransportError,
    TransportReply,
};
use crate::config::ApiKey;

pub struct GeminiTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<ApiKey>,
    timeout: Duration,
}

impl GeminiTransport {
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
impl ChatTransport for GeminiTransport {
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<TransportReply, TransportError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );

        let mut request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(&wire_body(messages, max_tokens));

        if let Some(api_key) = &self.api_key {
            request = request.header("x-goog-api-key", api_key.expose_secret());
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

fn classify_error(status: u16, body: &str) -> TransportError {
    if status != 429 && is_resource_exhausted(body) {
        return TransportError::Quota(truncate_body(body));
    }
    status_error(status, body)
}

/// Matches `{"error": {"status": "RESOURCE_EXHAUSTED", ...}}`.
fn is_resource_exhausted(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    value
        .get("error")
        .and_then(|e| e.get("status"))
        .and_then(|s| s.as_str())
        == Some("RESOURCE_EXHAUSTED")
}

/// Gemini has no system role. System text rides in `systemInstruction`
/// and assistant turns become role `model`.
fn wire_body(messages: &[ChatMessage], max_tokens: u32) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                Role::System => return None,
                Role::User => "user",
                Role::Assistant => "model",
            };
            Some(serde_json::json!({
                "role": role,
                "parts": [{"text": m.text}],
            }))
        })
        .collect();

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": {"maxOutputTokens": max_tokens},
    });

    if let Some(system) = messages.iter().find(|m| m.role == Role::System) {
        body["systemInstruction"] = serde_json::json!({"parts": [{"text": system.text}]});
    }

    body
}

fn parse_reply(value: &serde_json::Value) -> Result<TransportReply, TransportError> {
    let text = value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| {
            TransportError::Malformed(
                "response has no candidates[0].content.parts[0].text".to_string(),
            )
        })?;

    let tokens_used = value
        .get("usageMetadata")
        .and_then(|u| u.get("totalTokenCount"))
        .and_then(|v| v.as_u64());

    Ok(TransportReply {
        text: text.to_string(),
        tokens_used,
    })
}
