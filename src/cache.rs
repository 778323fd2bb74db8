//! Response cache keyed by a normalized-message fingerprint.
//!
//! Keys carry no caller or session component, so a hit is shared across all
//! callers. The fingerprint is the first 128 bits of a SHA-256 over the
//! lower-cased, whitespace-collapsed message; the stored normalized text is
//! compared on read so a fingerprint collision degrades to a miss instead
//! of serving the wrong answer.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How often the background sweeper evicts expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A previously computed answer served from cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
}

struct CacheEntry {
    normalized: String,
    text: String,
    provider: String,
    model: String,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// TTL map from message fingerprint to a prior successful response.
///
/// Entries expire passively on read and actively via the sweeper task.
/// Last-writer-wins on concurrent puts for the same fingerprint; both
/// writers computed equivalent answers.
pub struct ResponseCache {
    entries: DashMap<u128, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Look up a response for `message`. Expired entries are evicted here
    /// rather than waiting for the sweeper.
    pub fn get(&self, message: &str) -> Option<CachedResponse> {
        let normalized = normalize(message);
        let key = fingerprint(&normalized);

        let expired = match self.entries.get(&key) {
            None => return None,
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                // Fingerprint collision: different text, same key
                if entry.normalized != normalized {
                    return None;
                }
                return Some(CachedResponse {
                    text: entry.text.clone(),
                    provider: entry.provider.clone(),
                    model: entry.model.clone(),
                });
            }
        };

        if expired {
            self.entries.remove(&key);
        }
        None
    }

    /// Store a successful response for `message`.
    pub fn put(&self, message: &str, text: &str, provider: &str, model: &str) {
        let normalized = normalize(message);
        let key = fingerprint(&normalized);

        self.entries.insert(
            key,
            CacheEntry {
                normalized,
                text: text.to_string(),
                provider: provider.to_string(),
                model: model.to_string(),
                inserted_at: Instant::now(),
                ttl: self.ttl,
            },
        );

        while self.entries.len() > self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| *entry.key());

        match oldest {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }
}

/// Spawn the periodic expiry sweep for `cache`.
pub fn spawn_sweeper(cache: Arc<ResponseCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                tracing::debug!(removed, "cache sweep evicted expired entries");
            }
        }
    })
}

/// Lower-case and collapse all whitespace runs to single spaces.
fn normalize(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// First 128 bits of SHA-256 over the normalized message.
fn fingerprint(normalized: &str) -> u128 {
    let digest = Sha256::digest(normalized.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(bytes)
}
