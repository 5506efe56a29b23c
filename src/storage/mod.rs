//! Storage module.
//!
//! Store traits plus two implementations: an in-memory store with per-key
//! locking and a SQLite store using the `strategies` / `reports` /
//! `services_catalog` schema.

pub mod memory;
pub mod models;
pub mod queries;
pub mod sqlite;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::EngineResult;

pub use memory::MemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

/// Computes the next state of a strategy from its current state (`None` if
/// the key has no record yet). Must be pure: stores may call it again on retry.
pub type StrategyFold<'a> = &'a dyn Fn(Option<&Strategy>) -> Strategy;

/// Re-derives a status from a stored record.
pub type StatusFold<'a> = &'a dyn Fn(&Strategy) -> StrategyStatus;

/// Result of a committed report.
#[derive(Debug, Clone)]
pub struct Committed {
    pub strategy: Strategy,
    pub previous_status: Option<StrategyStatus>,
    pub report_id: ReportId,
}

/// Result of a status-only re-evaluation that changed the record.
#[derive(Debug, Clone)]
pub struct Reclassified {
    pub strategy: Strategy,
    pub previous_status: StrategyStatus,
}

/// Durable keyed storage for strategy records.
pub trait StrategyStore: Send + Sync {
    fn get(&self, key: &StrategyKey) -> EngineResult<Option<Strategy>>;

    fn get_by_id(&self, id: StrategyId) -> EngineResult<Option<Strategy>>;

    /// Get-or-create `key`, replace it with `fold(current)` and append `report`
    /// linked to the resolved id. Serialized per key; all-or-nothing.
    fn commit(
        &self,
        key: &StrategyKey,
        report: &NewReport,
        fold: StrategyFold<'_>,
    ) -> EngineResult<Committed>;

    /// Re-derive the status of an existing record under the same per-key
    /// serialization as `commit`. Returns `Some` only when the status changed.
    fn reclassify(
        &self,
        key: &StrategyKey,
        evaluate: StatusFold<'_>,
    ) -> EngineResult<Option<Reclassified>>;

    /// Strategies for one (provider, service) whose stored status is in `statuses`.
    fn list_for_service(
        &self,
        provider_id: &str,
        service_id: &str,
        statuses: &[StrategyStatus],
    ) -> EngineResult<Vec<Strategy>>;

    /// Strategies for one service under any provider.
    fn list_for_service_any_provider(
        &self,
        service_id: &str,
        statuses: &[StrategyStatus],
    ) -> EngineResult<Vec<Strategy>>;

    /// Keys of non-deprecated strategies whose last success (or creation, if
    /// never confirmed) is older than `cutoff`.
    fn stale_candidates(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<StrategyKey>>;

    fn status_counts(&self) -> EngineResult<StatusCounts>;

    /// Count of non-deprecated strategies per service for one provider.
    fn servable_counts_by_service(&self, provider_id: &str) -> EngineResult<HashMap<String, u64>>;
}

/// Append-only store of individual outcome reports.
pub trait ReportLedger: Send + Sync {
    fn append(&self, strategy_id: Option<StrategyId>, report: &NewReport) -> EngineResult<ReportId>;

    /// Reports from `fingerprint` with `reported_at > since`, oldest first.
    fn recent_by_fingerprint(
        &self,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<Report>>;

    /// Every report linked to one strategy, oldest first.
    fn by_strategy(&self, strategy_id: StrategyId) -> EngineResult<Vec<Report>>;
}

/// Read-only lookup of protected services.
pub trait ServiceCatalog: Send + Sync {
    fn get_service(&self, service_id: &str) -> EngineResult<Option<ServiceCatalogEntry>>;

    fn list_services(&self) -> EngineResult<Vec<ServiceCatalogEntry>>;
}

/// A backend holding both strategies and the ledger, so a report and its
/// aggregate update can commit together.
pub trait Store: StrategyStore + ReportLedger {}

impl<T: StrategyStore + ReportLedger> Store for T {}
