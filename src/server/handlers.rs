//! HTTP request handlers.

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::types::{RespondRequest, RespondResponse};
use super::{AppState, RequestId};
use crate::error::Error;
use crate::router::RespondOptions;
use crate::storage::{spawn_log_write, RequestLog};

/// Response header: correlation ID (UUID v4).
pub const LLMUX_REQUEST_ID_HEADER: &str = "x-llmux-request-id";
/// Response header: provider that served the request.
pub const LLMUX_PROVIDER_HEADER: &str = "x-llmux-provider";
/// Response header: model that served the request.
pub const LLMUX_MODEL_HEADER: &str = "x-llmux-model";
/// Response header: "true" when served from the cache.
pub const LLMUX_CACHED_HEADER: &str = "x-llmux-cached";
/// Response header: wall-clock latency in milliseconds (integer).
pub const LLMUX_LATENCY_MS_HEADER: &str = "x-llmux-latency-ms";

/// Handle POST /v1/respond
pub async fn respond(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<RespondRequest>,
) -> Result<Response, Error> {
    let start = std::time::Instant::now();
    let request_id = request_id.0.to_string();

    if request.message.trim().is_empty() {
        return Err(Error::BadRequest("message must not be empty".to_string()));
    }

    tracing::info!(
        caller = ?request.caller_id,
        session = ?request.session_id,
        provider_hint = ?request.provider,
        "received respond request"
    );

    let options = RespondOptions {
        caller_id: request.caller_id.clone(),
        session_id: request.session_id.clone(),
        skip_cache: request.skip_cache,
        preferred_provider: request.provider.clone(),
        preferred_model: request.model.clone(),
        max_tokens: request.max_tokens,
    };

    let result = state.service.respond(&request.message, &options).await;

    // Log the outcome (fire-and-forget)
    let wall_latency_ms = start.elapsed().as_millis() as i64;
    if state.config.logging.log_requests {
        if let Some(pool) = &state.db {
            let log_entry = match &result {
                Ok(reply) => RequestLog {
                    request_id: request_id.clone(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    caller_id: request.caller_id.clone(),
                    session_id: request.session_id.clone(),
                    provider: Some(reply.provider.clone()),
                    model: Some(reply.model.clone()),
                    cached: reply.cached,
                    latency_ms: wall_latency_ms,
                    success: true,
                    error_kind: None,
                },
                Err(error) => RequestLog {
                    request_id: request_id.clone(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    caller_id: request.caller_id.clone(),
                    session_id: request.session_id.clone(),
                    provider: None,
                    model: None,
                    cached: false,
                    latency_ms: wall_latency_ms,
                    success: false,
                    error_kind: Some(error_kind(error).to_string()),
                },
            };
            spawn_log_write(pool, log_entry);
        }
    }

    match result {
        Ok(reply) => {
            let provider = reply.provider.clone();
            let model = reply.model.clone();
            let cached = reply.cached;
            let latency_ms = reply.latency_ms;
            let mut response = Json(RespondResponse {
                text: reply.text,
                provider: reply.provider,
                model: reply.model,
                cached,
                latency_ms,
            })
            .into_response();
            attach_llmux_headers(
                response.headers_mut(),
                &request_id,
                Some(&provider),
                Some(&model),
                Some(cached),
                Some(latency_ms),
            );
            Ok(response)
        }
        Err(error) => {
            let mut response = error.into_response();
            attach_llmux_headers(response.headers_mut(), &request_id, None, None, None, None);
            Ok(response)
        }
    }
}

/// Handle GET /v1/models - flattened model list across all providers
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let mut models: Vec<serde_json::Value> = vec![];

    for provider in state.service.providers() {
        for descriptor in provider.catalog().models() {
            models.push(serde_json::json!({
                "id": descriptor.id,
                "display_name": descriptor.display_name,
                "provider": provider.name(),
                "quota_limit": descriptor.quota_limit,
                "quota_unit": descriptor.quota_unit,
                "available": provider.is_available(),
            }));
        }
    }

    Json(serde_json::json!({ "models": models }))
}

/// Handle GET /v1/providers - configured providers and availability
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .service
        .providers()
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name(),
                "kind": p.kind(),
                "available": p.is_available(),
                "models": p.catalog().len(),
            })
        })
        .collect();

    Json(serde_json::json!({ "providers": providers }))
}

/// Handle GET /v1/stats - in-memory aggregate counters
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.stats_snapshot())
}

/// Handle GET /health
///
/// `ok` when every model is healthy, `degraded` when some are, and
/// `unhealthy` (503) when no available provider has a healthy model.
/// Quota exhaustion is deliberately not part of this signal.
pub async fn health(State(state): State<AppState>) -> Response {
    let mut provider_rows = Vec::new();
    let mut any_usable = false;
    let mut any_unhealthy = false;

    for provider in state.service.providers() {
        let status_rows = provider.model_status();
        for row in &status_rows {
            if row.healthy && provider.is_available() {
                any_usable = true;
            }
            if !row.healthy {
                any_unhealthy = true;
            }
        }
        provider_rows.push(serde_json::json!({
            "name": provider.name(),
            "available": provider.is_available(),
            "models": status_rows,
        }));
    }

    let status = if !any_usable {
        "unhealthy"
    } else if any_unhealthy {
        "degraded"
    } else {
        "ok"
    };

    let body = Json(serde_json::json!({
        "status": status,
        "service": "llmux",
        "providers": provider_rows,
    }));

    if status == "unhealthy" {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    } else {
        body.into_response()
    }
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::RateLimited { .. } => "rate_limited",
        Error::AllProvidersFailed => "all_providers_failed",
        Error::BadRequest(_) => "bad_request",
    }
}

/// Attach llmux metadata headers to a response.
///
/// The request id is always present; provider, model, cached and latency
/// only when the request reached a definite outcome.
fn attach_llmux_headers(
    headers: &mut HeaderMap,
    request_id: &str,
    provider: Option<&str>,
    model: Option<&str>,
    cached: Option<bool>,
    latency_ms: Option<u64>,
) {
    insert_header(headers, LLMUX_REQUEST_ID_HEADER, request_id);
    if let Some(provider) = provider {
        insert_header(headers, LLMUX_PROVIDER_HEADER, provider);
    }
    if let Some(model) = model {
        insert_header(headers, LLMUX_MODEL_HEADER, model);
    }
    if let Some(cached) = cached {
        headers.insert(
            HeaderName::from_static(LLMUX_CACHED_HEADER),
            HeaderValue::from_static(if cached { "true" } else { "false" }),
        );
    }
    if let Some(latency) = latency_ms {
        headers.insert(
            HeaderName::from_static(LLMUX_LATENCY_MS_HEADER),
            HeaderValue::from(latency),
        );
    }
}

/// Insert a header, dropping values that are not valid header text.
fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
