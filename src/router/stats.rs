//! In-memory aggregate request statistics.
//!
//! Counters cover the life of the process. Every routed request lands in
//! exactly one of success / failure / rate_limited, so those three sum to
//! `total`; cache hits are the subset of successes served without an
//! upstream call.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Rolling latency window size.
const LATENCY_WINDOW: usize = 100;

pub struct StatsRegistry {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    cache_hits: AtomicU64,
    rate_limited: AtomicU64,
    per_provider: DashMap<String, u64>,
    latencies: Mutex<VecDeque<u64>>,
}

/// Point-in-time copy of the registry, shaped for the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub counts: CountsSection,
    pub providers: BTreeMap<String, u64>,
    pub performance: PerformanceSection,
}

#[derive(Debug, Serialize)]
pub struct CountsSection {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub cache_hits: u64,
    pub rate_limited: u64,
}

#[derive(Debug, Serialize)]
pub struct PerformanceSection {
    /// Mean over the rolling window; 0.0 before any upstream response.
    pub avg_latency_ms: f64,
    /// How many responses the mean covers.
    pub samples: usize,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            per_provider: DashMap::new(),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    /// Record a response produced by an upstream provider.
    pub fn record_success(&self, provider: &str, latency_ms: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.success.fetch_add(1, Ordering::Relaxed);
        *self.per_provider.entry(provider.to_string()).or_insert(0) += 1;

        let mut latencies = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
        latencies.push_back(latency_ms);
        while latencies.len() > LATENCY_WINDOW {
            latencies.pop_front();
        }
    }

    /// Record a response served from the cache. No latency sample; the
    /// window tracks upstream round trips only.
    pub fn record_cache_hit(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.success.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that exhausted every provider.
    pub fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected at the rate-limit gate.
    pub fn record_rate_limited(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let latencies = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
        let samples = latencies.len();
        let avg_latency_ms = if samples == 0 {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / samples as f64
        };
        drop(latencies);

        let providers = self
            .per_provider
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        StatsSnapshot {
            counts: CountsSection {
                total: self.total.load(Ordering::Relaxed),
                success: self.success.load(Ordering::Relaxed),
                failure: self.failure.load(Ordering::Relaxed),
                cache_hits: self.cache_hits.load(Ordering::Relaxed),
                rate_limited: self.rate_limited.load(Ordering::Relaxed),
            },
            providers,
            performance: PerformanceSection {
                avg_latency_ms,
                samples,
            },
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
