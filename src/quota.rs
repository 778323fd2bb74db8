//! Per-model daily quota tracking.
//!
//! Usage accumulates against a daily window whose boundary is midnight at a
//! per-provider UTC offset. There is no background timer: callers invoke
//! [`QuotaTracker::check_and_maybe_reset`] at the start of every request and
//! the window rolls over lazily. The window start only ever advances, so a
//! wall clock stepping backwards cannot re-open a spent window.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

use crate::catalog::{ModelCatalog, QuotaUnit};

/// Fraction of a token budget that may be spent before the model counts as
/// exhausted. Leaves headroom so a response in flight does not overshoot.
const TOKEN_SAFETY_PERCENT: u64 = 95;

/// Current usage against a model's quota.
#[derive(Debug, Clone)]
pub struct QuotaUsage {
    pub model: String,
    pub used: u64,
    pub limit: u64,
    pub unit: QuotaUnit,
}

struct ModelQuotaInner {
    used: u64,
    window_start: DateTime<Utc>,
}

/// Concurrent quota registry with one counter per model.
pub struct QuotaTracker {
    /// Minutes east of UTC at which this provider's day rolls over.
    offset_minutes: i32,
    limits: HashMap<String, (u64, QuotaUnit)>,
    states: DashMap<String, ModelQuotaInner>,
}

impl QuotaTracker {
    /// Create a tracker with a zeroed counter per catalog model. The first
    /// window begins at the current day boundary.
    pub fn new(catalog: &ModelCatalog, offset_minutes: i32) -> Self {
        let now = Utc::now();
        let mut limits = HashMap::with_capacity(catalog.len());
        let states = DashMap::with_capacity(catalog.len());

        for model in catalog.models() {
            limits.insert(model.id.clone(), (model.quota_limit, model.quota_unit));
            states.insert(
                model.id.clone(),
                ModelQuotaInner {
                    used: 0,
                    window_start: window_start_for(now, offset_minutes),
                },
            );
        }

        Self {
            offset_minutes,
            limits,
            states,
        }
    }

    /// Roll the window over if `now` has crossed the next day boundary.
    /// Returns true when a reset happened; the caller is responsible for
    /// healing the model's health record in that case.
    pub fn check_and_maybe_reset(&self, model_id: &str, now: DateTime<Utc>) -> bool {
        let Some(mut state) = self.states.get_mut(model_id) else {
            return false;
        };

        let current_window = window_start_for(now, self.offset_minutes);
        if current_window > state.window_start {
            tracing::info!(
                model = %model_id,
                used = state.used,
                "quota window reset"
            );
            state.window_start = current_window;
            state.used = 0;
            return true;
        }
        false
    }

    /// Whether `model_id` has spent its quota for the window containing
    /// `now`. A lapsed window reports not-exhausted; the counter itself is
    /// only cleared by [`check_and_maybe_reset`](Self::check_and_maybe_reset).
    pub fn is_exhausted(&self, model_id: &str, now: DateTime<Utc>) -> bool {
        let Some(state) = self.states.get(model_id) else {
            return false;
        };
        let Some(&(limit, unit)) = self.limits.get(model_id) else {
            return false;
        };

        if window_start_for(now, self.offset_minutes) > state.window_start {
            return false;
        }
        state.used >= effective_limit(limit, unit)
    }

    /// Add usage to `model_id`: 1 per request for request quotas, the token
    /// count for token quotas.
    pub fn record_usage(&self, model_id: &str, amount: u64) {
        if let Some(mut state) = self.states.get_mut(model_id) {
            state.used = state.used.saturating_add(amount);
        }
    }

    /// Mark `model_id` spent for the rest of its window. Used when the
    /// upstream reports quota exhaustion the local counter did not predict;
    /// the upstream's view wins.
    pub fn force_exhaust(&self, model_id: &str) {
        let Some(mut state) = self.states.get_mut(model_id) else {
            return;
        };
        let Some(&(limit, _)) = self.limits.get(model_id) else {
            return;
        };
        state.used = state.used.max(limit);
        tracing::warn!(model = %model_id, "quota force-exhausted on upstream signal");
    }

    /// Current usage for one model.
    pub fn usage(&self, model_id: &str) -> Option<QuotaUsage> {
        let state = self.states.get(model_id)?;
        let &(limit, unit) = self.limits.get(model_id)?;
        Some(QuotaUsage {
            model: model_id.to_string(),
            used: state.used,
            limit,
            unit,
        })
    }
}

/// Start of the day containing `now`, where days roll over at midnight
/// `offset_minutes` east of UTC. Returned as a UTC instant.
fn window_start_for(now: DateTime<Utc>, offset_minutes: i32) -> DateTime<Utc> {
    let shift = Duration::minutes(offset_minutes as i64);
    let shifted = now + shift;
    let local_day_start = shifted.date_naive().and_time(NaiveTime::MIN).and_utc();
    local_day_start - shift
}

/// Requests count to the full limit; token budgets stop short of it.
fn effective_limit(limit: u64, unit: QuotaUnit) -> u64 {
    match unit {
        QuotaUnit::Requests => limit,
        QuotaUnit::Tokens => (limit.saturating_mul(TOKEN_SAFETY_PERCENT) / 100).max(1),
    }
}
