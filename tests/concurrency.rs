//! Concurrent submissions: no lost updates, admission holds under bursts.

use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use strategy_reputation::config::{EngineConfig, RateLimitConfig, StoreConfig};
use strategy_reputation::storage::Store;
use strategy_reputation::{ReportSubmission, ReputationEngine, SubmitOutcome};

const THREADS: usize = 8;
const PER_THREAD: usize = 12;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
}

fn config() -> EngineConfig {
    EngineConfig {
        store: StoreConfig {
            lock_timeout_ms: 10_000,
            retry_attempts: 5,
            ..StoreConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn submission(fingerprint: String, args: serde_json::Value, success: bool) -> ReportSubmission {
    ReportSubmission {
        provider_id: "rostelecom".to_string(),
        service_id: "discord".to_string(),
        args,
        claimed_hash: None,
        success,
        latency_ms: 90.0,
        fingerprint,
        client_version: String::new(),
    }
}

/// Every thread reports on the same handful of strategies with its own
/// fingerprints; the aggregate counters must add up to the accepted reports.
fn hammer_shared_keys<S: Store>(engine: &ReputationEngine<S>) {
    let strategies = [json!(["--a"]), json!(["--b"]), json!(["--c"])];

    let accepted: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|worker| {
                let strategies = &strategies;
                scope.spawn(move || {
                    let mut accepted = 0;
                    for i in 0..PER_THREAD {
                        let fp = format!("worker-{:04}-{:012}", worker, i);
                        let args = strategies[i % strategies.len()].clone();
                        let outcome = engine
                            .submit(&submission(fp, args, i % 4 != 0), t(i as i64))
                            .unwrap();
                        if outcome.is_accepted() {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });
    assert_eq!(accepted, THREADS * PER_THREAD);

    let ranked = engine.best_strategies("rostelecom", "discord", 10, t(60)).unwrap();
    assert_eq!(ranked.len(), strategies.len());
    let total: u64 = ranked.iter().map(|r| r.strategy.total_reports()).sum();
    assert_eq!(total, (THREADS * PER_THREAD) as u64);

    for r in &ranked {
        let ledger = engine.store().by_strategy(r.strategy.id).unwrap();
        assert_eq!(ledger.len() as u64, r.strategy.total_reports());
        let successes = ledger.iter().filter(|rep| rep.success).count() as u64;
        assert_eq!(successes, r.strategy.success_count);
        assert!((r.strategy.avg_latency_ms - 90.0).abs() < 1e-9);
    }
    assert_eq!(engine.store().status_counts().unwrap().total, 3);
}

/// One fingerprint fires from many threads at once; exactly the window
/// limit gets through.
fn burst_from_one_fingerprint<S: Store>(engine: &ReputationEngine<S>) {
    let fp = "burst-fingerprint-0001".to_string();

    let outcomes: Vec<SubmitOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let fp = fp.clone();
                scope.spawn(move || {
                    engine
                        .submit(&submission(fp, json!([format!("--burst={}", i)]), true), t(0))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
    assert_eq!(accepted, 5);
    assert_eq!(outcomes.len() - accepted, 11);
    assert_eq!(
        engine.store().recent_by_fingerprint(&fp, t(-1)).unwrap().len(),
        5
    );
}

fn burst_config() -> EngineConfig {
    EngineConfig {
        rate_limit: RateLimitConfig {
            max_reports_per_window: 5,
            window_secs: 3600,
            max_distinct_strategies_per_window: 100,
            max_reports_per_strategy_window: 1,
            strategy_window_secs: 300,
        },
        ..config()
    }
}

#[test]
fn test_memory_no_lost_updates() {
    let engine = ReputationEngine::in_memory(config()).unwrap();
    hammer_shared_keys(&engine);
}

#[test]
fn test_sqlite_no_lost_updates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ReputationEngine::open_sqlite(dir.path().join("reputation.db"), config()).unwrap();
    hammer_shared_keys(&engine);
}

#[test]
fn test_memory_fingerprint_burst() {
    let engine = ReputationEngine::in_memory(burst_config()).unwrap();
    burst_from_one_fingerprint(&engine);
}

#[test]
fn test_sqlite_fingerprint_burst() {
    let dir = tempfile::tempdir().unwrap();
    let engine =
        ReputationEngine::open_sqlite(dir.path().join("reputation.db"), burst_config()).unwrap();
    burst_from_one_fingerprint(&engine);
}
