//! In-memory store.
//!
//! Each strategy key owns a cell with a writer gate and a published snapshot.
//! Writers for one key queue on that key's gate only; readers take a short
//! read lock on the snapshot and never wait for a writer's fold. The ledger
//! is sharded per fingerprint and per strategy so appends for different
//! fingerprints do not contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::config::StoreConfig;
use crate::error::{EngineError, EngineResult};

use super::models::*;
use super::{
    Committed, Reclassified, ReportLedger, StatusFold, StrategyFold, StrategyStore,
};

#[derive(Debug, Default)]
struct StrategyCell {
    writer: Mutex<()>,
    current: RwLock<Option<Strategy>>,
}

impl StrategyCell {
    fn snapshot(&self) -> Option<Strategy> {
        self.current.read().clone()
    }
}

/// Process-local store, used in tests and single-node deployments.
#[derive(Debug)]
pub struct MemoryStore {
    cells: DashMap<StrategyKey, Arc<StrategyCell>>,
    ids: DashMap<StrategyId, StrategyKey>,
    by_service: DashMap<ServiceKey, Vec<StrategyKey>>,
    next_strategy_id: AtomicI64,
    reports_by_fingerprint: DashMap<String, Vec<Report>>,
    reports_by_strategy: DashMap<StrategyId, Vec<Report>>,
    next_report_id: AtomicI64,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default().lock_timeout())
    }
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            cells: DashMap::new(),
            ids: DashMap::new(),
            by_service: DashMap::new(),
            next_strategy_id: AtomicI64::new(1),
            reports_by_fingerprint: DashMap::new(),
            reports_by_strategy: DashMap::new(),
            next_report_id: AtomicI64::new(1),
            lock_timeout,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.lock_timeout())
    }

    pub fn strategy_count(&self) -> usize {
        self.ids.len()
    }

    fn cell(&self, key: &StrategyKey) -> Option<Arc<StrategyCell>> {
        self.cells.get(key).map(|c| Arc::clone(c.value()))
    }

    fn snapshots<'a, I>(&self, keys: I) -> Vec<Strategy>
    where
        I: IntoIterator<Item = &'a StrategyKey>,
    {
        keys.into_iter()
            .filter_map(|key| self.cell(key))
            .filter_map(|cell| cell.snapshot())
            .collect()
    }

    fn all_snapshots(&self) -> Vec<Strategy> {
        let cells: Vec<Arc<StrategyCell>> =
            self.cells.iter().map(|c| Arc::clone(c.value())).collect();
        cells.iter().filter_map(|cell| cell.snapshot()).collect()
    }

    fn conflict(key: &StrategyKey) -> EngineError {
        EngineError::ConcurrencyConflict {
            key: key.to_string(),
            attempts: 1,
        }
    }
}

fn push_ordered(reports: &mut Vec<Report>, report: Report) {
    let pos = reports.partition_point(|r| r.reported_at <= report.reported_at);
    reports.insert(pos, report);
}

impl StrategyStore for MemoryStore {
    fn get(&self, key: &StrategyKey) -> EngineResult<Option<Strategy>> {
        Ok(self.cell(key).and_then(|cell| cell.snapshot()))
    }

    fn get_by_id(&self, id: StrategyId) -> EngineResult<Option<Strategy>> {
        let key = match self.ids.get(&id) {
            Some(key) => key.value().clone(),
            None => return Ok(None),
        };
        self.get(&key)
    }

    fn commit(
        &self,
        key: &StrategyKey,
        report: &NewReport,
        fold: StrategyFold<'_>,
    ) -> EngineResult<Committed> {
        let cell = Arc::clone(self.cells.entry(key.clone()).or_default().value());
        let _writer = cell
            .writer
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| Self::conflict(key))?;

        let current = cell.snapshot();
        let mut next = fold(current.as_ref());
        next.key = key.clone();
        next.id = match &current {
            Some(existing) => existing.id,
            None => StrategyId(self.next_strategy_id.fetch_add(1, Ordering::SeqCst)),
        };

        let report_id = self.append(Some(next.id), report)?;

        if current.is_none() {
            self.ids.insert(next.id, key.clone());
            self.by_service
                .entry(key.service())
                .or_default()
                .push(key.clone());
        }
        *cell.current.write() = Some(next.clone());

        Ok(Committed {
            strategy: next,
            previous_status: current.map(|c| c.status),
            report_id,
        })
    }

    fn reclassify(
        &self,
        key: &StrategyKey,
        evaluate: StatusFold<'_>,
    ) -> EngineResult<Option<Reclassified>> {
        let cell = match self.cell(key) {
            Some(cell) => cell,
            None => return Ok(None),
        };
        let _writer = cell
            .writer
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| Self::conflict(key))?;

        let mut strategy = match cell.snapshot() {
            Some(strategy) => strategy,
            None => return Ok(None),
        };
        let previous_status = strategy.status;
        let status = evaluate(&strategy);
        if status == previous_status {
            return Ok(None);
        }
        strategy.status = status;
        *cell.current.write() = Some(strategy.clone());

        Ok(Some(Reclassified {
            strategy,
            previous_status,
        }))
    }

    fn list_for_service(
        &self,
        provider_id: &str,
        service_id: &str,
        statuses: &[StrategyStatus],
    ) -> EngineResult<Vec<Strategy>> {
        let service = ServiceKey {
            provider_id: provider_id.to_string(),
            service_id: service_id.to_string(),
        };
        let keys = match self.by_service.get(&service) {
            Some(keys) => keys.value().clone(),
            None => return Ok(Vec::new()),
        };
        Ok(self
            .snapshots(keys.iter())
            .into_iter()
            .filter(|s| statuses.contains(&s.status))
            .collect())
    }

    fn list_for_service_any_provider(
        &self,
        service_id: &str,
        statuses: &[StrategyStatus],
    ) -> EngineResult<Vec<Strategy>> {
        let keys: Vec<StrategyKey> = self
            .by_service
            .iter()
            .filter(|entry| entry.key().service_id == service_id)
            .flat_map(|entry| entry.value().clone())
            .collect();
        Ok(self
            .snapshots(keys.iter())
            .into_iter()
            .filter(|s| statuses.contains(&s.status))
            .collect())
    }

    fn stale_candidates(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<StrategyKey>> {
        Ok(self
            .all_snapshots()
            .into_iter()
            .filter(|s| s.status.is_servable() && s.last_evidence_at() < cutoff)
            .map(|s| s.key)
            .collect())
    }

    fn status_counts(&self) -> EngineResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for strategy in self.all_snapshots() {
            counts.add(strategy.status);
        }
        Ok(counts)
    }

    fn servable_counts_by_service(&self, provider_id: &str) -> EngineResult<HashMap<String, u64>> {
        let keys: Vec<StrategyKey> = self
            .by_service
            .iter()
            .filter(|entry| entry.key().provider_id == provider_id)
            .flat_map(|entry| entry.value().clone())
            .collect();

        let mut counts: HashMap<String, u64> = HashMap::new();
        for strategy in self.snapshots(keys.iter()) {
            if strategy.status.is_servable() {
                *counts.entry(strategy.key.service_id).or_default() += 1;
            }
        }
        Ok(counts)
    }
}

impl ReportLedger for MemoryStore {
    fn append(&self, strategy_id: Option<StrategyId>, report: &NewReport) -> EngineResult<ReportId> {
        let id = ReportId(self.next_report_id.fetch_add(1, Ordering::SeqCst));
        let entry = Report::from_new(id, strategy_id, report);

        if let Some(strategy_id) = strategy_id {
            push_ordered(
                &mut self.reports_by_strategy.entry(strategy_id).or_default(),
                entry.clone(),
            );
        }
        push_ordered(
            &mut self
                .reports_by_fingerprint
                .entry(report.fingerprint.clone())
                .or_default(),
            entry,
        );
        Ok(id)
    }

    fn recent_by_fingerprint(
        &self,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<Report>> {
        Ok(match self.reports_by_fingerprint.get(fingerprint) {
            Some(reports) => {
                let start = reports.partition_point(|r| r.reported_at <= since);
                reports[start..].to_vec()
            }
            None => Vec::new(),
        })
    }

    fn by_strategy(&self, strategy_id: StrategyId) -> EngineResult<Vec<Report>> {
        Ok(self
            .reports_by_strategy
            .get(&strategy_id)
            .map(|reports| reports.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn report(fingerprint: &str, at: DateTime<Utc>, success: bool) -> NewReport {
        NewReport {
            fingerprint: fingerprint.to_string(),
            reported_at: at,
            success,
            latency_ms: 10.0,
            client_version: "1.0".to_string(),
        }
    }

    fn counting_fold(key: &StrategyKey, success: bool, now: DateTime<Utc>) -> impl Fn(Option<&Strategy>) -> Strategy + '_ {
        move |current| match current {
            Some(s) => {
                let mut next = s.clone();
                if success {
                    next.success_count += 1;
                } else {
                    next.fail_count += 1;
                }
                next
            }
            None => Strategy {
                id: StrategyId::UNASSIGNED,
                key: key.clone(),
                args: json!(["--x"]),
                success_count: success as u64,
                fail_count: (!success) as u64,
                avg_latency_ms: 0.0,
                recent_success: 0.0,
                recent_fail: 0.0,
                recent_as_of: now,
                last_confirmed: success.then_some(now),
                first_reported: now,
                status: StrategyStatus::Unconfirmed,
            },
        }
    }

    #[test]
    fn test_commit_creates_then_updates_one_record() {
        let store = MemoryStore::default();
        let key = StrategyKey::new("mts", "youtube", "h1");

        let first = store
            .commit(&key, &report("fp-a", t(0), true), &counting_fold(&key, true, t(0)))
            .unwrap();
        assert!(first.previous_status.is_none());
        assert!(first.strategy.id.is_assigned());

        let second = store
            .commit(&key, &report("fp-b", t(1), false), &counting_fold(&key, false, t(1)))
            .unwrap();
        assert_eq!(second.strategy.id, first.strategy.id);
        assert_eq!(second.previous_status, Some(StrategyStatus::Unconfirmed));
        assert_eq!(second.strategy.success_count, 1);
        assert_eq!(second.strategy.fail_count, 1);
        assert_eq!(store.strategy_count(), 1);

        let ledger = store.by_strategy(first.strategy.id).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|r| r.strategy_id == Some(first.strategy.id)));
    }

    #[test]
    fn test_recent_by_fingerprint_is_time_bounded_and_ordered() {
        let store = MemoryStore::default();
        store.append(None, &report("fp", t(30), true)).unwrap();
        store.append(None, &report("fp", t(10), true)).unwrap();
        store.append(None, &report("fp", t(20), false)).unwrap();
        store.append(None, &report("other", t(25), true)).unwrap();

        let recent = store.recent_by_fingerprint("fp", t(10)).unwrap();
        let times: Vec<_> = recent.iter().map(|r| r.reported_at).collect();
        assert_eq!(times, vec![t(20), t(30)]);
        assert!(store.recent_by_fingerprint("nobody", t(0)).unwrap().is_empty());
    }

    #[test]
    fn test_reclassify_only_reports_changes() {
        let store = MemoryStore::default();
        let key = StrategyKey::new("mts", "discord", "h2");
        store
            .commit(&key, &report("fp", t(0), true), &counting_fold(&key, true, t(0)))
            .unwrap();

        assert!(store
            .reclassify(&key, &|_| StrategyStatus::Unconfirmed)
            .unwrap()
            .is_none());
        let changed = store
            .reclassify(&key, &|_| StrategyStatus::Deprecated)
            .unwrap()
            .unwrap();
        assert_eq!(changed.previous_status, StrategyStatus::Unconfirmed);
        assert_eq!(store.get(&key).unwrap().unwrap().status, StrategyStatus::Deprecated);

        let missing = StrategyKey::new("mts", "discord", "nope");
        assert!(store.reclassify(&missing, &|_| StrategyStatus::Confirmed).unwrap().is_none());
    }

    #[test]
    fn test_listing_filters_by_provider_service_and_status() {
        let store = MemoryStore::default();
        for (provider, service, hash) in [
            ("mts", "youtube", "a"),
            ("mts", "youtube", "b"),
            ("beeline", "youtube", "c"),
            ("mts", "discord", "d"),
        ] {
            let key = StrategyKey::new(provider, service, hash);
            store
                .commit(&key, &report("fp", t(0), true), &counting_fold(&key, true, t(0)))
                .unwrap();
        }
        store
            .reclassify(&StrategyKey::new("mts", "youtube", "b"), &|_| {
                StrategyStatus::Deprecated
            })
            .unwrap();

        let servable = store
            .list_for_service("mts", "youtube", &StrategyStatus::SERVABLE)
            .unwrap();
        assert_eq!(servable.len(), 1);
        assert_eq!(servable[0].key.strategy_hash, "a");

        let any = store
            .list_for_service_any_provider("youtube", &StrategyStatus::ALL)
            .unwrap();
        assert_eq!(any.len(), 3);

        let counts = store.servable_counts_by_service("mts").unwrap();
        assert_eq!(counts.get("youtube"), Some(&1));
        assert_eq!(counts.get("discord"), Some(&1));

        let totals = store.status_counts().unwrap();
        assert_eq!(totals.total, 4);
        assert_eq!(totals.deprecated, 1);
    }

    #[test]
    fn test_stale_candidates_skip_deprecated_and_fresh() {
        let store = MemoryStore::default();
        let old = StrategyKey::new("mts", "youtube", "old");
        let fresh = StrategyKey::new("mts", "youtube", "fresh");
        store
            .commit(&old, &report("fp", t(0), true), &counting_fold(&old, true, t(0)))
            .unwrap();
        store
            .commit(&fresh, &report("fp", t(500), true), &counting_fold(&fresh, true, t(500)))
            .unwrap();

        assert_eq!(store.stale_candidates(t(100)).unwrap(), vec![old.clone()]);

        store.reclassify(&old, &|_| StrategyStatus::Deprecated).unwrap();
        assert!(store.stale_candidates(t(100)).unwrap().is_empty());
    }

    #[test]
    fn test_held_key_times_out_as_conflict() {
        let store = MemoryStore::new(Duration::from_millis(20));
        let key = StrategyKey::new("mts", "youtube", "busy");
        store
            .commit(&key, &report("fp", t(0), true), &counting_fold(&key, true, t(0)))
            .unwrap();

        let cell = store.cell(&key).unwrap();
        let _held = cell.writer.lock();
        let err = store
            .commit(&key, &report("fp", t(1), true), &counting_fold(&key, true, t(1)))
            .unwrap_err();
        assert!(matches!(err, EngineError::ConcurrencyConflict { .. }));
        // nothing from the failed attempt reached the ledger
        assert_eq!(store.recent_by_fingerprint("fp", t(-1)).unwrap().len(), 1);
    }
}
