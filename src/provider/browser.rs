//! Browser-automation sidecar bridge.
//!
//! Talks plain JSON to a local sidecar that drives a logged-in web chat
//! session. The sidecar types one prompt per call, so the conversation is
//! flattened into a single transcript. No credential is involved; the
//! sidecar owns the browser session. Error bodies are free text and go
//! through the shared quota-pattern table.

use async_trait::async_trait;
use reqwest::header;
use std::time::Duration;

use super::transport::{
    is_quota_text, request_error, status_error, truncate_body, ChatMessage, ChatTransport, Role,
    TransportError, TransportReply,
};

pub struct BrowserTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl BrowserTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ChatTransport for BrowserTransport {
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}/chat", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": model,
            "prompt": flatten(messages),
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if status.as_u16() != 429 && is_quota_text(&error_body) {
                return Err(TransportError::Quota(truncate_body(&error_body)));
            }
            return Err(status_error(status.as_u16(), &error_body));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let text = value
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| TransportError::Malformed("response has no text field".to_string()))?;
        let tokens_used = value.get("tokens_used").and_then(|v| v.as_u64());

        Ok(TransportReply {
            text: text.to_string(),
            tokens_used,
        })
    }
}

fn flatten(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let prefix = match message.role {
            Role::System => "System: ",
            Role::User => "User: ",
            Role::Assistant => "Assistant: ",
        };
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str(prefix);
        prompt.push_str(&message.text);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> BrowserTransport {
        BrowserTransport::new(reqwest::Client::new(), server.uri(), Duration::from_secs(5))
    }

    #[test]
    fn test_flatten_prefixes_roles() {
        let messages = [
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        assert_eq!(
            flatten(&messages),
            "System: be brief\n\nUser: hi\n\nAssistant: hello"
        );
    }

    #[tokio::test]
    async fn test_success_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_partial_json(json!({
                "model": "web-chat",
                "prompt": "User: hi",
                "max_tokens": 64,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": "hello from the page"})),
            )
            .mount(&server)
            .await;

        let reply = transport(&server)
            .call("web-chat", &[ChatMessage::user("hi")], 64)
            .await
            .unwrap();

        assert_eq!(reply.text, "hello from the page");
        assert_eq!(reply.tokens_used, None);
    }

    #[tokio::test]
    async fn test_quota_text_in_error_body_classified_as_quota() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503).set_body_string("daily limit reached, come back later"),
            )
            .mount(&server)
            .await;

        let err = transport(&server)
            .call("web-chat", &[ChatMessage::user("hi")], 64)
            .await
            .unwrap_err();

        assert!(err.is_quota(), "expected quota, got {:?}", err);
    }

    #[tokio::test]
    async fn test_plain_error_classified_as_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("browser session crashed"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .call("web-chat", &[ChatMessage::user("hi")], 64)
            .await
            .unwrap_err();

        match err {
            TransportError::Http { status, .. } => assert_eq!(status, 500),
            other => panic!("expected Http, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_text_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "done"})))
            .mount(&server)
            .await;

        let err = transport(&server)
            .call("web-chat", &[ChatMessage::user("hi")], 64)
            .await
            .unwrap_err();

        assert!(
            matches!(err, TransportError::Malformed(_)),
            "expected Malformed, got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_slow_sidecar_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"text": "late"}))
                    .set_delay(Duration::from_millis(250)),
            )
            .mount(&server)
            .await;

        let transport =
            BrowserTransport::new(reqwest::Client::new(), server.uri(), Duration::from_millis(50));
        let err = transport
            .call("web-chat", &[ChatMessage::user("hi")], 64)
            .await
            .unwrap_err();

        assert!(
            matches!(err, TransportError::Timeout(_)),
            "expected Timeout, got {:?}",
            err
        );
    }
}
