//! Per-provider respond loop.
//!
//! A [`ProviderClient`] owns one upstream transport plus the model catalog,
//! health records, quota counters and conversation history for that
//! upstream. Nothing here is shared across providers; a failing provider
//! can never dirty another provider's state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use super::browser::BrowserTransport;
use super::gemini::GeminiTransport;
use super::history::ConversationStore;
use super::openai::OpenAiTransport;
use super::transport::{ChatMessage, ChatTransport, TransportReply};
use crate::catalog::{ModelCatalog, QuotaUnit};
use crate::config::{ProviderConfig, ProviderKind};
use crate::health::HealthTracker;
use crate::quota::QuotaTracker;

/// Successful provider response.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: String,
    pub model: String,
    pub latency_ms: u64,
}

/// Why a provider produced no response. Stays inside the router; callers
/// never see these directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailure {
    /// Every model was unhealthy or quota-exhausted before any call.
    NoModelsAvailable,
    /// Every candidate was attempted and failed.
    AllModelsFailed,
}

/// Combined health + quota view of one model, for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model: String,
    pub display_name: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub avg_latency_ms: Option<f64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub quota_used: u64,
    pub quota_limit: u64,
    pub quota_unit: QuotaUnit,
}

pub struct ProviderClient {
    name: String,
    kind: ProviderKind,
    available: bool,
    transport: Box<dyn ChatTransport>,
    catalog: ModelCatalog,
    health: HealthTracker,
    quota: QuotaTracker,
    history: ConversationStore,
    system_prompt: Option<String>,
    default_max_tokens: u32,
}

impl ProviderClient {
    /// Build a client with the wire transport matching the configured kind.
    pub fn from_config(
        config: &ProviderConfig,
        http: reqwest::Client,
        history_max_turns: usize,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let transport: Box<dyn ChatTransport> = match config.kind {
            ProviderKind::Openai => Box::new(OpenAiTransport::new(
                http,
                config.url.clone(),
                config.api_key.clone(),
                timeout,
            )),
            ProviderKind::Gemini => Box::new(GeminiTransport::new(
                http,
                config.url.clone(),
                config.api_key.clone(),
                timeout,
            )),
            ProviderKind::Browser => {
                Box::new(BrowserTransport::new(http, config.url.clone(), timeout))
            }
        };
        Self::with_transport(config, transport, history_max_turns)
    }

    /// Build a client around an existing transport. Tests use this to
    /// substitute scripted transports.
    pub fn with_transport(
        config: &ProviderConfig,
        transport: Box<dyn ChatTransport>,
        history_max_turns: usize,
    ) -> Self {
        let catalog = ModelCatalog::from_config(&config.models);
        let health = HealthTracker::new(&catalog);
        let quota = QuotaTracker::new(&catalog, config.utc_offset_minutes);
        let available = config.api_key.is_some() || !config.kind.requires_key();

        Self {
            name: config.name.clone(),
            kind: config.kind,
            available,
            transport,
            catalog,
            health,
            quota,
            history: ConversationStore::new(history_max_turns),
            system_prompt: config.system_prompt.clone(),
            default_max_tokens: config.default_max_tokens,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// A provider without its required credential is never attempted.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Try this provider's candidate models in order and return the first
    /// success. Quota errors exhaust the model for the rest of the window;
    /// other failures count against its health.
    pub async fn respond(
        &self,
        message: &str,
        session_id: Option<&str>,
        preferred_model: Option<&str>,
        max_tokens: Option<u32>,
    ) -> Result<ProviderReply, ProviderFailure> {
        let now = Utc::now();
        let candidates = self.candidate_models(preferred_model, now);
        if candidates.is_empty() {
            tracing::debug!(provider = %self.name, "no usable models");
            return Err(ProviderFailure::NoModelsAvailable);
        }

        let messages = self.build_messages(message, session_id);
        let max_tokens = max_tokens.unwrap_or(self.default_max_tokens);

        for model_id in &candidates {
            let started = Instant::now();
            match self.transport.call(model_id, &messages, max_tokens).await {
                Ok(reply) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.health.record_success(model_id, latency_ms);
                    self.quota
                        .record_usage(model_id, self.usage_amount(model_id, &reply));
                    if let Some(session) = session_id {
                        self.history.append_exchange(session, message, &reply.text);
                    }
                    tracing::info!(
                        provider = %self.name,
                        model = %model_id,
                        latency_ms,
                        "upstream responded"
                    );
                    return Ok(ProviderReply {
                        text: reply.text,
                        model: model_id.clone(),
                        latency_ms,
                    });
                }
                Err(err) if err.is_quota() => {
                    tracing::warn!(
                        provider = %self.name,
                        model = %model_id,
                        error = %err,
                        "upstream reported quota exhaustion"
                    );
                    self.quota.force_exhaust(model_id);
                }
                Err(err) => {
                    tracing::warn!(
                        provider = %self.name,
                        model = %model_id,
                        error = %err,
                        "upstream call failed"
                    );
                    self.health.record_failure(model_id);
                }
            }
        }

        tracing::warn!(provider = %self.name, "all candidate models failed");
        Err(ProviderFailure::AllModelsFailed)
    }

    /// Heal every model. Quota counters are left untouched.
    pub fn reset_health(&self) {
        self.health.reset_all();
    }

    /// Status rows for every catalog model, in priority order.
    pub fn model_status(&self) -> Vec<ModelStatus> {
        self.catalog
            .models()
            .iter()
            .filter_map(|descriptor| {
                let health = self.health.snapshot(&descriptor.id)?;
                let usage = self.quota.usage(&descriptor.id)?;
                Some(ModelStatus {
                    model: descriptor.id.clone(),
                    display_name: descriptor.display_name.clone(),
                    healthy: health.healthy,
                    consecutive_failures: health.consecutive_failures,
                    avg_latency_ms: health.avg_latency_ms,
                    last_success_at: health.last_success_at,
                    quota_used: usage.used,
                    quota_limit: usage.limit,
                    quota_unit: usage.unit,
                })
            })
            .collect()
    }

    /// Usable models in priority order, preferred model fronted when it
    /// survives the filter. Window resets happen here, before the
    /// usability checks, and a reset heals the model's health record.
    fn candidate_models(&self, preferred: Option<&str>, now: DateTime<Utc>) -> Vec<String> {
        let mut candidates = Vec::new();
        for descriptor in self.catalog.models() {
            if self.quota.check_and_maybe_reset(&descriptor.id, now) {
                self.health.reset(&descriptor.id);
            }
            if !self.health.is_usable(&descriptor.id) {
                continue;
            }
            if self.quota.is_exhausted(&descriptor.id, now) {
                continue;
            }
            candidates.push(descriptor.id.clone());
        }

        if let Some(preferred) = preferred {
            if let Some(pos) = candidates.iter().position(|id| id == preferred) {
                let id = candidates.remove(pos);
                candidates.insert(0, id);
            }
        }

        candidates
    }

    fn build_messages(&self, message: &str, session_id: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system));
        }
        if let Some(session) = session_id {
            messages.extend(self.history.turns(session));
        }
        messages.push(ChatMessage::user(message));
        messages
    }

    fn usage_amount(&self, model_id: &str, reply: &TransportReply) -> u64 {
        let unit = self
            .catalog
            .get(model_id)
            .map(|d| d.quota_unit)
            .unwrap_or_default();
        match unit {
            QuotaUnit::Requests => 1,
            // Rough 4-chars-per-token estimate when the upstream omits usage.
            QuotaUnit::Tokens => reply
                .tokens_used
                .unwrap_or_else(|| (reply.text.len() as u64 / 4).max(1)),
        }
    }
}
