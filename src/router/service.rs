//! Request routing across the provider cascade.
//!
//! One request flows rate-limit gate -> cache lookup -> providers in
//! priority order -> cache write + stats. The first provider to produce a
//! response wins; providers are always tried one at a time, never raced.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::stats::{StatsRegistry, StatsSnapshot};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::Error;
use crate::provider::ProviderClient;
use crate::ratelimit::{RateDecision, UserRateLimiter};

/// Caller-supplied routing knobs. Everything is optional; the zero value
/// routes with defaults.
#[derive(Debug, Clone, Default)]
pub struct RespondOptions {
    pub caller_id: Option<String>,
    pub session_id: Option<String>,
    pub skip_cache: bool,
    pub preferred_provider: Option<String>,
    pub preferred_model: Option<String>,
    pub max_tokens: Option<u32>,
}

/// A routed response and where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct RouterReply {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub cached: bool,
}

pub struct AiService {
    providers: Vec<Arc<ProviderClient>>,
    cache: Option<Arc<ResponseCache>>,
    rate_limiter: UserRateLimiter,
    rate_limit_enabled: bool,
    min_interval: Duration,
    stats: StatsRegistry,
}

impl AiService {
    /// Build the service and one provider client per configured upstream.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|p| {
                Arc::new(ProviderClient::from_config(
                    p,
                    http.clone(),
                    config.history.max_turns,
                ))
            })
            .collect();
        Self::with_providers(config, providers)
    }

    /// Assemble the router around pre-built provider clients.
    pub fn with_providers(config: &Config, providers: Vec<Arc<ProviderClient>>) -> Self {
        let cache = config.cache.enabled.then(|| {
            Arc::new(ResponseCache::new(
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.max_entries,
            ))
        });

        Self {
            providers,
            cache,
            rate_limiter: UserRateLimiter::new(),
            rate_limit_enabled: config.rate_limit.enabled,
            min_interval: Duration::from_millis(config.rate_limit.min_interval_ms),
            stats: StatsRegistry::new(),
        }
    }

    /// Route one message through the cascade.
    ///
    /// Rate limiting applies only when the caller identifies itself.
    /// `skip_cache` bypasses the lookup but a fresh success still
    /// overwrites the cached entry.
    pub async fn respond(
        &self,
        message: &str,
        options: &RespondOptions,
    ) -> Result<RouterReply, Error> {
        if self.rate_limit_enabled {
            if let Some(caller_id) = &options.caller_id {
                if let RateDecision::Limited { wait_ms } =
                    self.rate_limiter.check_and_record(caller_id, self.min_interval)
                {
                    tracing::debug!(caller = %caller_id, wait_ms, "rate limited");
                    self.stats.record_rate_limited();
                    return Err(Error::RateLimited { wait_ms });
                }
            }
        }

        if !options.skip_cache {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get(message) {
                    tracing::debug!(provider = %hit.provider, model = %hit.model, "cache hit");
                    self.stats.record_cache_hit();
                    return Ok(RouterReply {
                        text: hit.text,
                        provider: hit.provider,
                        model: hit.model,
                        latency_ms: 0,
                        cached: true,
                    });
                }
            }
        }

        for provider in self.provider_order(options.preferred_provider.as_deref()) {
            if !provider.is_available() {
                tracing::debug!(provider = %provider.name(), "provider unavailable, skipping");
                continue;
            }

            match provider
                .respond(
                    message,
                    options.session_id.as_deref(),
                    options.preferred_model.as_deref(),
                    options.max_tokens,
                )
                .await
            {
                Ok(reply) => {
                    if let Some(cache) = &self.cache {
                        cache.put(message, &reply.text, provider.name(), &reply.model);
                    }
                    self.stats.record_success(provider.name(), reply.latency_ms);
                    return Ok(RouterReply {
                        text: reply.text,
                        provider: provider.name().to_string(),
                        model: reply.model,
                        latency_ms: reply.latency_ms,
                        cached: false,
                    });
                }
                Err(failure) => {
                    tracing::debug!(
                        provider = %provider.name(),
                        failure = ?failure,
                        "provider produced no response, trying next"
                    );
                }
            }
        }

        self.stats.record_failure();
        Err(Error::AllProvidersFailed)
    }

    /// Manually heal every model of one provider. Returns false when no
    /// provider matches.
    pub fn reset_provider(&self, name: &str) -> bool {
        let Some(provider) = self
            .providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
        else {
            return false;
        };
        provider.reset_health();
        tracing::info!(provider = %provider.name(), "provider health manually reset");
        true
    }

    /// Providers in configured priority order.
    pub fn providers(&self) -> &[Arc<ProviderClient>] {
        &self.providers
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Priority order with an available preferred provider fronted.
    fn provider_order(&self, preferred: Option<&str>) -> Vec<Arc<ProviderClient>> {
        let mut order = self.providers.clone();
        if let Some(preferred) = preferred {
            let position = order
                .iter()
                .position(|p| p.name().eq_ignore_ascii_case(preferred) && p.is_available());
            if let Some(pos) = position {
                let provider = order.remove(pos);
                order.insert(0, provider);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ApiKey, CacheConfig, HistoryConfig, LoggingConfig, ModelConfig, ProviderConfig,
        ProviderKind, RateLimitConfig, ServerConfig,
    };
    use crate::provider::transport::{
        ChatMessage, ChatTransport, TransportError, TransportReply,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always answers with a fixed text, or a network error when `text`
    /// is None. Counts calls either way.
    struct TestTransport {
        text: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatTransport for TestTransport {
        async fn call(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _max_tokens: u32,
        ) -> Result<TransportReply, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.text {
                Some(text) => Ok(TransportReply {
                    text: text.to_string(),
                    tokens_used: None,
                }),
                None => Err(TransportError::Network("upstream down".to_string())),
            }
        }
    }

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                listen: "127.0.0.1:0".to_string(),
                max_in_flight: 512,
            },
            database: None,
            providers: Vec::new(),
            cache: CacheConfig {
                enabled: true,
                ttl_secs: 3600,
                max_entries: 64,
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                min_interval_ms: 1000,
            },
            history: HistoryConfig { max_turns: 10 },
            logging: LoggingConfig::default(),
        }
    }

    fn provider(name: &str, with_key: bool, text: Option<&'static str>) -> (Arc<ProviderClient>, Arc<AtomicUsize>) {
        let config = ProviderConfig {
            name: name.to_string(),
            kind: ProviderKind::Openai,
            url: "http://localhost:0".to_string(),
            api_key: with_key.then(|| ApiKey::from("test-key")),
            system_prompt: None,
            utc_offset_minutes: 0,
            timeout_secs: 5,
            default_max_tokens: 64,
            models: vec![ModelConfig {
                id: format!("{name}-model"),
                display_name: None,
                quota_limit: 1000,
                quota_unit: Default::default(),
            }],
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = Box::new(TestTransport {
            text,
            calls: Arc::clone(&calls),
        });
        (
            Arc::new(ProviderClient::with_transport(&config, transport, 10)),
            calls,
        )
    }

    #[tokio::test]
    async fn test_first_provider_success_short_circuits() {
        let (p1, c1) = provider("primary", true, Some("from primary"));
        let (p2, c2) = provider("secondary", true, Some("from secondary"));
        let service = AiService::with_providers(&test_config(), vec![p1, p2]);

        let reply = service
            .respond("hello", &RespondOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.provider, "primary");
        assert_eq!(reply.text, "from primary");
        assert!(!reply.cached);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cascade_falls_through_failing_provider() {
        let (p1, c1) = provider("primary", true, None);
        let (p2, _c2) = provider("secondary", true, Some("rescued"));
        let service = AiService::with_providers(&test_config(), vec![p1, p2]);

        let reply = service
            .respond("hello", &RespondOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.provider, "secondary");
        assert_eq!(c1.load(Ordering::SeqCst), 1, "failed provider was attempted");
    }

    #[tokio::test]
    async fn test_unavailable_provider_never_attempted() {
        let (p1, c1) = provider("keyless", false, Some("should not answer"));
        let (p2, _c2) = provider("secondary", true, Some("answered"));
        let service = AiService::with_providers(&test_config(), vec![p1, p2]);

        let reply = service
            .respond("hello", &RespondOptions::default())
            .await
            .unwrap();

        assert_eq!(reply.provider, "secondary");
        assert_eq!(c1.load(Ordering::SeqCst), 0, "no call without a credential");
    }

    #[tokio::test]
    async fn test_preferred_provider_tried_before_higher_priority() {
        let (p1, c1) = provider("primary", true, Some("from primary"));
        let (p2, _c2) = provider("secondary", true, Some("from secondary"));
        let service = AiService::with_providers(&test_config(), vec![p1, p2]);

        let options = RespondOptions {
            preferred_provider: Some("secondary".to_string()),
            ..Default::default()
        };
        let reply = service.respond("hello", &options).await.unwrap();

        assert_eq!(reply.provider, "secondary");
        assert_eq!(c1.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_preferred_provider_keeps_order() {
        let (p1, _c1) = provider("primary", true, Some("from primary"));
        let service = AiService::with_providers(&test_config(), vec![p1]);

        let options = RespondOptions {
            preferred_provider: Some("no-such".to_string()),
            ..Default::default()
        };
        let reply = service.respond("hello", &options).await.unwrap();

        assert_eq!(reply.provider, "primary");
    }

    #[tokio::test]
    async fn test_unavailable_preferred_provider_not_fronted() {
        let (p1, _c1) = provider("primary", true, Some("from primary"));
        let (p2, c2) = provider("keyless", false, Some("never"));
        let service = AiService::with_providers(&test_config(), vec![p1, p2]);

        let options = RespondOptions {
            preferred_provider: Some("keyless".to_string()),
            ..Default::default()
        };
        let reply = service.respond("hello", &options).await.unwrap();

        assert_eq!(reply.provider, "primary");
        assert_eq!(c2.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_identical_message_served_from_cache() {
        let (p1, c1) = provider("primary", true, Some("expensive answer"));
        let service = AiService::with_providers(&test_config(), vec![p1]);

        let first = service
            .respond("What is Rust?", &RespondOptions::default())
            .await
            .unwrap();
        let second = service
            .respond("  what IS rust?  ", &RespondOptions::default())
            .await
            .unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.text, "expensive answer");
        assert_eq!(c1.load(Ordering::SeqCst), 1, "one upstream call total");
        assert_eq!(service.stats_snapshot().counts.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_skip_cache_forces_fresh_call() {
        let (p1, c1) = provider("primary", true, Some("answer"));
        let service = AiService::with_providers(&test_config(), vec![p1]);

        service
            .respond("hello", &RespondOptions::default())
            .await
            .unwrap();
        let options = RespondOptions {
            skip_cache: true,
            ..Default::default()
        };
        let second = service.respond("hello", &options).await.unwrap();

        assert!(!second.cached);
        assert_eq!(c1.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gate_rejects_rapid_caller() {
        let (p1, _c1) = provider("primary", true, Some("answer"));
        let mut config = test_config();
        config.rate_limit.enabled = true;
        config.cache.enabled = false;
        let service = AiService::with_providers(&config, vec![p1]);

        let options = RespondOptions {
            caller_id: Some("u1".to_string()),
            ..Default::default()
        };
        service.respond("first", &options).await.unwrap();
        let err = service.respond("second", &options).await.unwrap_err();

        match err {
            Error::RateLimited { wait_ms } => assert_eq!(wait_ms, 1000),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(service.stats_snapshot().counts.rate_limited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_calls_bypass_rate_limit() {
        let (p1, _c1) = provider("primary", true, Some("answer"));
        let mut config = test_config();
        config.rate_limit.enabled = true;
        config.cache.enabled = false;
        let service = AiService::with_providers(&config, vec![p1]);

        let options = RespondOptions::default();
        service.respond("first", &options).await.unwrap();
        service.respond("second", &options).await.unwrap();
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let (p1, _c1) = provider("primary", true, None);
        let (p2, _c2) = provider("secondary", true, None);
        let service = AiService::with_providers(&test_config(), vec![p1, p2]);

        let err = service
            .respond("hello", &RespondOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AllProvidersFailed));
        let counts = service.stats_snapshot().counts;
        assert_eq!(counts.failure, 1);
        assert_eq!(counts.success, 0);
    }

    #[tokio::test]
    async fn test_failed_cascade_writes_no_cache_entry() {
        let (p1, _c1) = provider("primary", true, None);
        let service = AiService::with_providers(&test_config(), vec![p1]);

        let _ = service.respond("hello", &RespondOptions::default()).await;

        assert!(service.cache().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_provider_heals_models() {
        let (p1, c1) = provider("flaky", true, None);
        let service = AiService::with_providers(&test_config(), vec![p1]);

        for _ in 0..3 {
            let _ = service.respond("hello", &RespondOptions::default()).await;
        }
        // Model tripped unhealthy; the next cascade skips it entirely.
        let _ = service.respond("hello", &RespondOptions::default()).await;
        assert_eq!(c1.load(Ordering::SeqCst), 3);

        assert!(service.reset_provider("flaky"));
        let _ = service.respond("hello", &RespondOptions::default()).await;
        assert_eq!(c1.load(Ordering::SeqCst), 4, "healed model attempted again");
    }

    #[tokio::test]
    async fn test_reset_unknown_provider_returns_false() {
        let service = AiService::with_providers(&test_config(), vec![]);
        assert!(!service.reset_provider("ghost"));
    }
}
