//! Status state machine.
//!
//! `evaluate` is a pure function of (record, thresholds, now) and is a fixed
//! point: evaluating a record whose status was set by `evaluate` at the same
//! instant returns that status again. It runs after every aggregate update,
//! at read time, and from the maintenance sweep.

use chrono::{DateTime, Utc};

use crate::config::StatusThresholds;
use crate::storage::{Strategy, StrategyStatus};

/// Multiplier applied to tallies that are `elapsed_secs` old.
pub fn decay_factor(elapsed_secs: f64, half_life_secs: u64) -> f64 {
    if half_life_secs == 0 {
        return 0.0;
    }
    let elapsed = elapsed_secs.max(0.0);
    0.5f64.powf(elapsed / half_life_secs as f64)
}

/// The decayed (success, fail) tallies of `strategy` as seen at `now`.
pub fn recent_tallies(
    strategy: &Strategy,
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
) -> (f64, f64) {
    let elapsed = (now - strategy.recent_as_of).num_milliseconds() as f64 / 1000.0;
    let factor = decay_factor(elapsed, thresholds.recent_half_life_secs);
    (strategy.recent_success * factor, strategy.recent_fail * factor)
}

/// No success within `T_stale` (creation time stands in for a success that
/// never happened).
pub fn is_stale(strategy: &Strategy, thresholds: &StatusThresholds, now: DateTime<Utc>) -> bool {
    now - strategy.last_evidence_at() > thresholds.stale_after()
}

/// Recent evidence is substantial and mostly failures.
pub fn is_degraded(
    strategy: &Strategy,
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
) -> bool {
    match recent_ratio(strategy, thresholds, now) {
        Some(ratio) => ratio < thresholds.deprecate_ratio,
        None => false,
    }
}

/// Recent success ratio, if there is at least `min_votes` of decayed evidence.
fn recent_ratio(
    strategy: &Strategy,
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
) -> Option<f64> {
    let (success, fail) = recent_tallies(strategy, thresholds, now);
    let evidence = success + fail;
    if evidence <= 0.0 || evidence < thresholds.min_votes as f64 {
        return None;
    }
    Some(success / evidence)
}

/// Status the record should have at `now`.
pub fn evaluate(
    strategy: &Strategy,
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
) -> StrategyStatus {
    if is_stale(strategy, thresholds, now) || is_degraded(strategy, thresholds, now) {
        return StrategyStatus::Deprecated;
    }

    match strategy.status {
        StrategyStatus::Unconfirmed => {
            if strategy.success_count >= thresholds.min_votes
                && strategy.success_ratio() >= thresholds.confirm_ratio
            {
                StrategyStatus::Confirmed
            } else {
                StrategyStatus::Unconfirmed
            }
        }
        StrategyStatus::Confirmed => StrategyStatus::Confirmed,
        StrategyStatus::Deprecated => {
            let recovered = strategy.success_count >= thresholds.min_votes
                && recent_ratio(strategy, thresholds, now)
                    .map_or(false, |ratio| ratio >= thresholds.confirm_ratio);
            if recovered {
                StrategyStatus::Confirmed
            } else {
                StrategyStatus::Deprecated
            }
        }
    }
}

/// Status to serve a stored record with, without writing it back.
///
/// The passage of time can only demote; promotion and recovery happen on
/// a write.
pub fn effective_status(
    strategy: &Strategy,
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
) -> StrategyStatus {
    match evaluate(strategy, thresholds, now) {
        StrategyStatus::Deprecated => StrategyStatus::Deprecated,
        _ => strategy.status,
    }
}
