//! Per-model health tracking.
//!
//! Each model carries a consecutive-failure counter and a bounded window of
//! recent response latencies. Three consecutive failures mark the model
//! unhealthy; it becomes healthy again on the next success, on a
//! quota-window reset, or on an explicit reset call. Health never changes
//! just because time passed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::catalog::ModelCatalog;

/// Consecutive failures required to mark a model unhealthy.
const FAILURE_THRESHOLD: u32 = 3;

/// Number of recent latency samples kept per model.
const LATENCY_WINDOW: usize = 10;

/// Snapshot of a single model's health state.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub model: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub avg_latency_ms: Option<f64>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Core health record for one model (not thread-safe on its own).
pub(crate) struct ModelHealthInner {
    healthy: bool,
    consecutive_failures: u32,
    last_success_at: Option<DateTime<Utc>>,
    recent_latencies: VecDeque<u64>,
}

impl ModelHealthInner {
    pub(crate) fn new() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_success_at: None,
            recent_latencies: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// Record a successful call. A single success heals the model even
    /// when it was unhealthy.
    pub(crate) fn record_success(&mut self, latency_ms: u64) {
        self.healthy = true;
        self.consecutive_failures = 0;
        self.last_success_at = Some(Utc::now());

        if self.recent_latencies.len() == LATENCY_WINDOW {
            self.recent_latencies.pop_front();
        }
        self.recent_latencies.push_back(latency_ms);
    }

    /// Record a failed call. Returns true when this failure crossed the
    /// threshold and the model just became unhealthy.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures == FAILURE_THRESHOLD {
            self.healthy = false;
            return true;
        }
        false
    }

    pub(crate) fn is_usable(&self) -> bool {
        self.healthy && self.consecutive_failures < FAILURE_THRESHOLD
    }

    /// Heal the model. Used on quota-window resets and manual resets.
    pub(crate) fn reset(&mut self) {
        self.healthy = true;
        self.consecutive_failures = 0;
    }

    /// Arithmetic mean over the latency window; None before any success.
    pub(crate) fn avg_latency_ms(&self) -> Option<f64> {
        if self.recent_latencies.is_empty() {
            return None;
        }
        let sum: u64 = self.recent_latencies.iter().sum();
        Some(sum as f64 / self.recent_latencies.len() as f64)
    }
}

/// Concurrent health registry with one record per model.
///
/// Backed by [`DashMap`] for per-key locking; updates to one model never
/// contend with reads of another.
pub struct HealthTracker {
    records: DashMap<String, ModelHealthInner>,
}

impl HealthTracker {
    /// Create a tracker with one healthy record per catalog model.
    pub fn new(catalog: &ModelCatalog) -> Self {
        let records = DashMap::with_capacity(catalog.len());
        for model in catalog.models() {
            records.insert(model.id.clone(), ModelHealthInner::new());
        }
        Self { records }
    }

    /// Record a successful call against `model_id`.
    pub fn record_success(&self, model_id: &str, latency_ms: u64) {
        if let Some(mut record) = self.records.get_mut(model_id) {
            record.record_success(latency_ms);
            tracing::debug!(model = %model_id, latency_ms, "health: success recorded");
        }
    }

    /// Record a failed call against `model_id`. Returns true when the model
    /// just became unhealthy.
    pub fn record_failure(&self, model_id: &str) -> bool {
        let Some(mut record) = self.records.get_mut(model_id) else {
            return false;
        };
        let tripped = record.record_failure();
        if tripped {
            tracing::warn!(
                model = %model_id,
                failures = record.consecutive_failures,
                "model marked unhealthy after consecutive failures"
            );
        }
        tripped
    }

    /// Whether `model_id` may be attempted. Unknown models are usable;
    /// health tracking is opt-in for catalog models.
    pub fn is_usable(&self, model_id: &str) -> bool {
        self.records
            .get(model_id)
            .map(|r| r.is_usable())
            .unwrap_or(true)
    }

    /// Heal one model.
    pub fn reset(&self, model_id: &str) {
        if let Some(mut record) = self.records.get_mut(model_id) {
            record.reset();
            tracing::info!(model = %model_id, "health: model reset to healthy");
        }
    }

    /// Heal every model in the registry.
    pub fn reset_all(&self) {
        for mut entry in self.records.iter_mut() {
            entry.value_mut().reset();
        }
    }

    /// Snapshot one model's health.
    pub fn snapshot(&self, model_id: &str) -> Option<HealthSnapshot> {
        self.records.get(model_id).map(|record| HealthSnapshot {
            model: model_id.to_string(),
            healthy: record.healthy,
            consecutive_failures: record.consecutive_failures,
            avg_latency_ms: record.avg_latency_ms(),
            last_success_at: record.last_success_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::QuotaUnit;
    use crate::config::ModelConfig;

    fn tracker_with(models: &[&str]) -> HealthTracker {
        let configs: Vec<ModelConfig> = models
            .iter()
            .map(|id| ModelConfig {
                id: id.to_string(),
                display_name: None,
                quota_limit: 100,
                quota_unit: QuotaUnit::Requests,
            })
            .collect();
        HealthTracker::new(&ModelCatalog::from_config(&configs))
    }

    // Helper: record FAILURE_THRESHOLD consecutive failures
    fn trip(tracker: &HealthTracker, model: &str) {
        for _ in 0..FAILURE_THRESHOLD {
            tracker.record_failure(model);
        }
    }

    #[test]
    fn test_initial_state_usable() {
        let tracker = tracker_with(&["m1"]);
        assert!(tracker.is_usable("m1"));

        let snap = tracker.snapshot("m1").unwrap();
        assert!(snap.healthy);
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.avg_latency_ms.is_none());
        assert!(snap.last_success_at.is_none());
    }

    #[test]
    fn test_single_failure_stays_usable() {
        let tracker = tracker_with(&["m1"]);
        assert!(!tracker.record_failure("m1"));
        assert!(tracker.is_usable("m1"));
        assert_eq!(tracker.snapshot("m1").unwrap().consecutive_failures, 1);
    }

    #[test]
    fn test_two_failures_stays_usable() {
        let tracker = tracker_with(&["m1"]);
        tracker.record_failure("m1");
        tracker.record_failure("m1");
        assert!(tracker.is_usable("m1"));
    }

    #[test]
    fn test_three_failures_marks_unusable() {
        let tracker = tracker_with(&["m1"]);
        assert!(!tracker.record_failure("m1"));
        assert!(!tracker.record_failure("m1"));
        // Third failure crosses the threshold
        assert!(tracker.record_failure("m1"));
        assert!(!tracker.is_usable("m1"));

        let snap = tracker.snapshot("m1").unwrap();
        assert!(!snap.healthy);
        assert_eq!(snap.consecutive_failures, 3);
    }

    #[test]
    fn test_fourth_failure_does_not_retrip() {
        let tracker = tracker_with(&["m1"]);
        trip(&tracker, "m1");
        // Already unhealthy; no fresh transition
        assert!(!tracker.record_failure("m1"));
        assert!(!tracker.is_usable("m1"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let tracker = tracker_with(&["m1"]);
        tracker.record_failure("m1");
        tracker.record_failure("m1");

        tracker.record_success("m1", 120);
        assert_eq!(tracker.snapshot("m1").unwrap().consecutive_failures, 0);

        // Two more failures are not consecutive with the first two
        tracker.record_failure("m1");
        tracker.record_failure("m1");
        assert!(tracker.is_usable("m1"));
    }

    #[test]
    fn test_success_heals_unhealthy_model() {
        let tracker = tracker_with(&["m1"]);
        trip(&tracker, "m1");
        assert!(!tracker.is_usable("m1"));

        tracker.record_success("m1", 80);
        assert!(tracker.is_usable("m1"));
        assert!(tracker.snapshot("m1").unwrap().last_success_at.is_some());
    }

    #[test]
    fn test_reset_heals_without_success() {
        let tracker = tracker_with(&["m1"]);
        trip(&tracker, "m1");
        assert!(!tracker.is_usable("m1"));

        tracker.reset("m1");
        assert!(tracker.is_usable("m1"));
        assert_eq!(tracker.snapshot("m1").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_failures_are_isolated_per_model() {
        let tracker = tracker_with(&["m1", "m2"]);
        trip(&tracker, "m1");

        assert!(!tracker.is_usable("m1"));
        assert!(tracker.is_usable("m2"));
        assert_eq!(tracker.snapshot("m2").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_latency_window_bounded_at_ten() {
        let tracker = tracker_with(&["m1"]);
        // 12 samples; the first two (1000ms) fall out of the window
        tracker.record_success("m1", 1000);
        tracker.record_success("m1", 1000);
        for _ in 0..10 {
            tracker.record_success("m1", 100);
        }

        let snap = tracker.snapshot("m1").unwrap();
        assert_eq!(snap.avg_latency_ms, Some(100.0));
    }

    #[test]
    fn test_avg_latency_is_mean_of_window() {
        let tracker = tracker_with(&["m1"]);
        tracker.record_success("m1", 100);
        tracker.record_success("m1", 200);
        tracker.record_success("m1", 300);

        let snap = tracker.snapshot("m1").unwrap();
        assert_eq!(snap.avg_latency_ms, Some(200.0));
    }

    #[test]
    fn test_unknown_model_is_usable_noop() {
        let tracker = tracker_with(&["m1"]);
        assert!(tracker.is_usable("ghost"));
        assert!(!tracker.record_failure("ghost"));
        tracker.record_success("ghost", 50);
        assert!(tracker.snapshot("ghost").is_none());
    }

    #[test]
    fn test_reset_all_heals_every_model() {
        let tracker = tracker_with(&["m1", "m2"]);
        trip(&tracker, "m1");
        trip(&tracker, "m2");

        tracker.reset_all();
        assert!(tracker.is_usable("m1"));
        assert!(tracker.is_usable("m2"));
    }
}
