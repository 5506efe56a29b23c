//! Aggregation of admitted reports into strategy records.
//!
//! `fold_report` is the pure update rule; `Aggregator` drives it through a
//! store's serialized `commit` with bounded retry.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::{StatusThresholds, StoreConfig};
use crate::error::{EngineError, EngineResult};
use crate::logging::structured::LogContext;
use crate::reputation::status::{evaluate, recent_tallies};
use crate::storage::{
    Committed, NewReport, Reclassified, StatusFold, Strategy, StrategyFold, StrategyId,
    StrategyKey, StrategyStatus, StrategyStore,
};
use crate::{log_error, log_info, log_warn};

/// Apply one report to the current record (`None` creates it).
///
/// Counters move by exactly one, the latency mean covers every report, and
/// the status is re-evaluated at the report's time.
pub fn fold_report(
    current: Option<&Strategy>,
    key: &StrategyKey,
    args: &Value,
    report: &NewReport,
    thresholds: &StatusThresholds,
) -> Strategy {
    let now = report.reported_at;
    let mut next = match current {
        Some(existing) => {
            let (recent_success, recent_fail) = recent_tallies(existing, thresholds, now);
            Strategy {
                recent_success,
                recent_fail,
                recent_as_of: existing.recent_as_of.max(now),
                ..existing.clone()
            }
        }
        None => new_record(key, args, now),
    };

    if report.success {
        next.success_count += 1;
        next.recent_success += 1.0;
        next.last_confirmed = Some(next.last_confirmed.map_or(now, |at| at.max(now)));
    } else {
        next.fail_count += 1;
        next.recent_fail += 1.0;
    }

    let n = next.total_reports() as f64;
    next.avg_latency_ms += (report.latency_ms - next.avg_latency_ms) / n;
    next.status = evaluate(&next, thresholds, now);
    next
}

fn new_record(key: &StrategyKey, args: &Value, now: DateTime<Utc>) -> Strategy {
    Strategy {
        id: StrategyId::UNASSIGNED,
        key: key.clone(),
        args: args.clone(),
        success_count: 0,
        fail_count: 0,
        avg_latency_ms: 0.0,
        recent_success: 0.0,
        recent_fail: 0.0,
        recent_as_of: now,
        last_confirmed: None,
        first_reported: now,
        status: StrategyStatus::Unconfirmed,
    }
}

/// Applies admitted reports and status re-evaluations with bounded retry.
#[derive(Debug, Clone)]
pub struct Aggregator {
    thresholds: StatusThresholds,
    retry: StoreConfig,
}

impl Aggregator {
    pub fn new(thresholds: StatusThresholds, retry: StoreConfig) -> Self {
        Self { thresholds, retry }
    }

    pub fn thresholds(&self) -> &StatusThresholds {
        &self.thresholds
    }

    /// Apply `report` to the strategy at `key`, creating it if needed, and
    /// append the report to the ledger in the same commit.
    pub fn apply(
        &self,
        store: &dyn StrategyStore,
        key: &StrategyKey,
        args: &Value,
        report: &NewReport,
        ctx: &LogContext,
    ) -> EngineResult<Committed> {
        let fold: StrategyFold<'_> =
            &|current| fold_report(current, key, args, report, &self.thresholds);
        let committed = self.with_retry(key, ctx, || store.commit(key, report, fold))?;

        match committed.previous_status {
            None => log_info!(
                ctx,
                "STRATEGY_CREATED",
                strategy_id = committed.strategy.id,
                success = report.success,
                status = committed.strategy.status
            ),
            Some(previous) if previous != committed.strategy.status => log_info!(
                ctx,
                "STATUS_TRANSITION",
                strategy_id = committed.strategy.id,
                from = previous,
                to = committed.strategy.status,
                success_count = committed.strategy.success_count,
                fail_count = committed.strategy.fail_count
            ),
            Some(_) => log::debug!(
                "{} REPORT_APPLIED strategy_id={} success_count={} fail_count={}",
                ctx,
                committed.strategy.id,
                committed.strategy.success_count,
                committed.strategy.fail_count
            ),
        }
        Ok(committed)
    }

    /// Re-evaluate the status of the record at `key` as of `now`.
    pub fn reevaluate(
        &self,
        store: &dyn StrategyStore,
        key: &StrategyKey,
        now: DateTime<Utc>,
        ctx: &LogContext,
    ) -> EngineResult<Option<Reclassified>> {
        let evaluate_at: StatusFold<'_> = &|strategy| evaluate(strategy, &self.thresholds, now);
        let changed = self.with_retry(key, ctx, || store.reclassify(key, evaluate_at))?;

        if let Some(reclassified) = &changed {
            log_info!(
                ctx,
                "STATUS_TRANSITION",
                strategy_id = reclassified.strategy.id,
                from = reclassified.previous_status,
                to = reclassified.strategy.status
            );
        }
        Ok(changed)
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget
    /// is spent. Sleeps between attempts.
    fn with_retry<T, F>(&self, key: &StrategyKey, ctx: &LogContext, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> EngineResult<T>,
    {
        let max_attempts = self.retry.retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    log_warn!(
                        ctx,
                        "STORE_RETRY",
                        attempt = attempt,
                        backoff_ms = backoff.as_millis(),
                        error = err
                    );
                    std::thread::sleep(backoff);
                }
                Err(err) if err.is_retryable() => {
                    log_error!(
                        ctx,
                        "STORE_RETRY_EXHAUSTED",
                        attempts = attempt,
                        error = err
                    );
                    return Err(match err {
                        EngineError::ConcurrencyConflict { .. } => {
                            EngineError::ConcurrencyConflict {
                                key: key.short(),
                                attempts: attempt,
                            }
                        }
                        other => other,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn key() -> StrategyKey {
        StrategyKey::new("rostelecom", "youtube", "hash-a")
    }

    fn report(at: DateTime<Utc>, success: bool, latency_ms: f64) -> NewReport {
        NewReport {
            fingerprint: "fp-0123456789abcdef".to_string(),
            reported_at: at,
            success,
            latency_ms,
            client_version: "test".to_string(),
        }
    }

    #[test]
    fn test_fold_creates_record() {
        let th = StatusThresholds::default();
        let args = json!(["--dpi-desync=fake"]);

        let created = fold_report(None, &key(), &args, &report(t(0), true, 80.0), &th);
        assert_eq!(created.success_count, 1);
        assert_eq!(created.fail_count, 0);
        assert_eq!(created.avg_latency_ms, 80.0);
        assert_eq!(created.first_reported, t(0));
        assert_eq!(created.last_confirmed, Some(t(0)));
        assert_eq!(created.status, StrategyStatus::Unconfirmed);
        assert_eq!(created.args, args);

        let failed = fold_report(None, &key(), &args, &report(t(0), false, 80.0), &th);
        assert_eq!((failed.success_count, failed.fail_count), (0, 1));
        assert_eq!(failed.last_confirmed, None);
    }

    #[test]
    fn test_fold_running_mean_over_all_reports() {
        let th = StatusThresholds::default();
        let args = json!(["--a"]);
        let mut s = fold_report(None, &key(), &args, &report(t(0), true, 100.0), &th);
        s = fold_report(Some(&s), &key(), &args, &report(t(1), false, 200.0), &th);
        s = fold_report(Some(&s), &key(), &args, &report(t(2), true, 300.0), &th);
        assert!((s.avg_latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(s.total_reports(), 3);
        assert_eq!(s.last_confirmed, Some(t(2)));
        assert_eq!(s.first_reported, t(0));
    }

    #[test]
    fn test_fold_promotes_after_enough_successes() {
        let th = StatusThresholds::default();
        let args = json!(["--a"]);
        let mut s = fold_report(None, &key(), &args, &report(t(0), true, 10.0), &th);
        for i in 1..th.min_votes {
            assert_eq!(s.status, StrategyStatus::Unconfirmed);
            s = fold_report(Some(&s), &key(), &args, &report(t(i as i64), true, 10.0), &th);
        }
        assert_eq!(s.status, StrategyStatus::Confirmed);
    }

    #[test]
    fn test_apply_commits_report_and_strategy() {
        let store = MemoryStore::default();
        let aggregator = Aggregator::new(StatusThresholds::default(), StoreConfig::default());
        let ctx = LogContext::new("test-req");
        let args = json!(["--a"]);

        let first = aggregator
            .apply(&store, &key(), &args, &report(t(0), true, 10.0), &ctx)
            .unwrap();
        assert!(first.strategy.id.is_assigned());
        assert_eq!(first.previous_status, None);

        let second = aggregator
            .apply(&store, &key(), &args, &report(t(1), false, 30.0), &ctx)
            .unwrap();
        assert_eq!(second.strategy.id, first.strategy.id);
        assert_eq!(second.previous_status, Some(StrategyStatus::Unconfirmed));
        assert_eq!(second.strategy.total_reports(), 2);

        let stored = store.get(&key()).unwrap().unwrap();
        assert_eq!(stored, second.strategy);
    }

    #[test]
    fn test_reevaluate_deprecates_stale_record() {
        let store = MemoryStore::default();
        let aggregator = Aggregator::new(StatusThresholds::default(), StoreConfig::default());
        let ctx = LogContext::new("test-req");
        aggregator
            .apply(&store, &key(), &json!(["--a"]), &report(t(0), true, 10.0), &ctx)
            .unwrap();

        let later = t(0) + Duration::days(8);
        let changed = aggregator.reevaluate(&store, &key(), later, &ctx).unwrap().unwrap();
        assert_eq!(changed.previous_status, StrategyStatus::Unconfirmed);
        assert_eq!(changed.strategy.status, StrategyStatus::Deprecated);
        assert!(aggregator.reevaluate(&store, &key(), later, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_retry_exhaustion_reports_attempts() {
        let retry = StoreConfig {
            retry_attempts: 3,
            retry_backoff_ms: 1,
            max_backoff_ms: 1,
            ..StoreConfig::default()
        };
        let aggregator = Aggregator::new(StatusThresholds::default(), retry);
        let ctx = LogContext::new("test-req");
        let mut calls = 0;
        let result: EngineResult<()> = aggregator.with_retry(&key(), &ctx, || {
            calls += 1;
            Err(EngineError::ConcurrencyConflict {
                key: "k".to_string(),
                attempts: 1,
            })
        });
        assert_eq!(calls, 3);
        assert!(matches!(
            result,
            Err(EngineError::ConcurrencyConflict { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_retry_recovers_and_skips_permanent_errors() {
        let retry = StoreConfig {
            retry_backoff_ms: 1,
            ..StoreConfig::default()
        };
        let aggregator = Aggregator::new(StatusThresholds::default(), retry);
        let ctx = LogContext::new("test-req");

        let mut calls = 0;
        let value = aggregator
            .with_retry(&key(), &ctx, || {
                calls += 1;
                if calls < 2 {
                    Err(EngineError::store_unavailable("busy"))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();
        assert_eq!(value, 2);

        let mut calls = 0;
        let result: EngineResult<()> = aggregator.with_retry(&key(), &ctx, || {
            calls += 1;
            Err(EngineError::Config("bad".to_string()))
        });
        assert_eq!(calls, 1);
        assert!(result.is_err());
    }
}
