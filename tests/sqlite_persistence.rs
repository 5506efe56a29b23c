//! State survives reopening a SQLite database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use strategy_reputation::config::{EngineConfig, RateLimitConfig};
use strategy_reputation::storage::{ReportLedger, ServiceCatalog, StrategyStore};
use strategy_reputation::validation::builtin_catalog;
use strategy_reputation::{ReportSubmission, ReputationEngine, StrategyStatus, SubmitOutcome};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
}

fn submission(fingerprint: &str, args: serde_json::Value) -> ReportSubmission {
    ReportSubmission {
        provider_id: "beeline".to_string(),
        service_id: "telegram".to_string(),
        args,
        claimed_hash: None,
        success: true,
        latency_ms: 75.0,
        fingerprint: fingerprint.to_string(),
        client_version: "podsos/2.0.0".to_string(),
    }
}

#[test]
fn test_aggregates_and_ledger_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reputation.db");
    let args = json!(["--dpi-desync=disorder2", "--dpi-desync-split-pos=1"]);

    let strategy_id = {
        let engine = ReputationEngine::open_sqlite(&path, EngineConfig::default()).unwrap();
        let mut id = None;
        for i in 0..6 {
            let fp = format!("persist-{:016x}", i);
            match engine.submit(&submission(&fp, args.clone()), t(i)).unwrap() {
                SubmitOutcome::Accepted { strategy_id, .. } => id = Some(strategy_id),
                other => panic!("expected accepted, got {:?}", other),
            }
        }
        id.unwrap()
    };

    let engine = ReputationEngine::open_sqlite(&path, EngineConfig::default()).unwrap();
    assert_eq!(engine.store().db_path(), Some(path.as_path()));

    let ranked = engine.best_strategies("beeline", "telegram", 5, t(60)).unwrap();
    assert_eq!(ranked.len(), 1);
    let record = &ranked[0].strategy;
    assert_eq!(record.id, strategy_id);
    assert_eq!(record.success_count, 6);
    assert_eq!(record.status, StrategyStatus::Confirmed);
    assert_eq!(record.args, args);
    assert_eq!(record.first_reported, t(0));
    assert_eq!(record.last_confirmed, Some(t(5)));

    let ledger = engine.reports_for_strategy(strategy_id).unwrap();
    assert_eq!(ledger.len(), 6);
    assert!(ledger.windows(2).all(|w| w[0].reported_at <= w[1].reported_at));
    assert_eq!(ledger[0].client_version, "podsos/2.0.0");

    // Existing records reopen; new reports keep folding into the same row.
    let outcome = engine
        .submit(&submission("persist-late-000000", args.clone()), t(120))
        .unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(engine.store().get_by_id(strategy_id).unwrap().unwrap().success_count, 7);
}

#[test]
fn test_rate_limit_window_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reputation.db");
    let config = EngineConfig {
        rate_limit: RateLimitConfig {
            max_reports_per_window: 2,
            ..RateLimitConfig::default()
        },
        ..EngineConfig::default()
    };
    let fp = "restart-fingerprint-01";

    {
        let engine = ReputationEngine::open_sqlite(&path, config.clone()).unwrap();
        assert!(engine.submit(&submission(fp, json!(["--one"])), t(0)).unwrap().is_accepted());
        assert!(engine.submit(&submission(fp, json!(["--two"])), t(1)).unwrap().is_accepted());
    }

    let engine = ReputationEngine::open_sqlite(&path, config).unwrap();
    let third = engine.submit(&submission(fp, json!(["--three"])), t(2)).unwrap();
    assert_eq!(third.as_str(), "rate_limited");
    assert_eq!(engine.store().recent_by_fingerprint(fp, t(-1)).unwrap().len(), 2);
}

#[test]
fn test_catalog_seeded_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reputation.db");
    let builtin = builtin_catalog().unwrap();

    let first = ReputationEngine::open_sqlite(&path, EngineConfig::default()).unwrap();
    assert_eq!(first.health().unwrap().catalog_services, builtin.len());
    drop(first);

    let engine = ReputationEngine::open_sqlite(&path, EngineConfig::default()).unwrap();
    assert_eq!(engine.store().seed_catalog(&builtin).unwrap(), 0);
    assert_eq!(engine.store().list_services().unwrap().len(), builtin.len());
    assert_eq!(engine.health().unwrap().catalog_services, builtin.len());

    let youtube = engine.get_service("youtube").unwrap().unwrap();
    assert_eq!(youtube.main_domain, "youtube.com");
    assert!(engine.get_service("myspace").unwrap().is_none());

    let overview = engine.services_overview("beeline").unwrap();
    assert_eq!(overview.len(), builtin.len());
    assert!(overview.iter().all(|o| o.strategy_count == 0));
}
