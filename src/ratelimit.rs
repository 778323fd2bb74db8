//! Per-caller rate limiting.
//!
//! A pure minimum-interval gate: each caller gets one request per interval,
//! with no burst credit for time spent idle. A denied call does not move the
//! caller's timestamp, so the wait it reports stays accurate.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request may proceed; the caller's timestamp was advanced.
    Allowed,
    /// Too soon. `wait_ms` is the remaining interval, rounded up.
    Limited { wait_ms: u64 },
}

/// Tracks the last allowed request per caller id.
pub struct UserRateLimiter {
    last_allowed: DashMap<String, Instant>,
}

impl UserRateLimiter {
    pub fn new() -> Self {
        Self {
            last_allowed: DashMap::new(),
        }
    }

    /// Check whether `caller_id` may proceed and record the allowance.
    pub fn check_and_record(&self, caller_id: &str, min_interval: Duration) -> RateDecision {
        let now = Instant::now();

        match self.last_allowed.entry(caller_id.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                RateDecision::Allowed
            }
            Entry::Occupied(mut entry) => {
                let elapsed = now.duration_since(*entry.get());
                if elapsed >= min_interval {
                    entry.insert(now);
                    RateDecision::Allowed
                } else {
                    let wait = min_interval - elapsed;
                    RateDecision::Limited {
                        wait_ms: wait.as_nanos().div_ceil(1_000_000) as u64,
                    }
                }
            }
        }
    }
}

impl Default for UserRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
