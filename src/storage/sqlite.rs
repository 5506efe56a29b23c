//! SQLite store.
//!
//! One write connection (every mutation runs in an `IMMEDIATE` transaction)
//! and, for file-backed databases, a small round-robin pool of read-only
//! connections so ranking queries are not queued behind writers in WAL mode.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension, Row,
    TransactionBehavior,
};
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::{EngineError, EngineResult};

use super::models::*;
use super::queries;
use super::{
    Committed, Reclassified, ReportLedger, ServiceCatalog, StatusFold, StrategyFold,
    StrategyStore,
};

const MAX_READ_POOL_SIZE: usize = 8;

fn to_store_err(e: rusqlite::Error) -> EngineError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            EngineError::store_unavailable(format!("database busy: {}", e))
        }
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            EngineError::CorruptRecord {
                id: "-".to_string(),
                reason: format!("constraint violated: {}", e),
            }
        }
        _ => EngineError::store_unavailable(e.to_string()),
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(id: &str, ms: i64) -> EngineResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| EngineError::CorruptRecord {
        id: id.to_string(),
        reason: format!("timestamp {} out of range", ms),
    })
}

/// Raw `strategies` row before decoding JSON, status and timestamps.
struct StrategyRow {
    id: i64,
    provider_id: String,
    service_id: String,
    strategy_hash: String,
    args: String,
    success_count: i64,
    fail_count: i64,
    avg_latency_ms: f64,
    recent_success: f64,
    recent_fail: f64,
    recent_as_of: i64,
    last_confirmed: Option<i64>,
    first_reported: i64,
    status: String,
}

impl StrategyRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            service_id: row.get(2)?,
            strategy_hash: row.get(3)?,
            args: row.get(4)?,
            success_count: row.get(5)?,
            fail_count: row.get(6)?,
            avg_latency_ms: row.get(7)?,
            recent_success: row.get(8)?,
            recent_fail: row.get(9)?,
            recent_as_of: row.get(10)?,
            last_confirmed: row.get(11)?,
            first_reported: row.get(12)?,
            status: row.get(13)?,
        })
    }

    fn decode(self) -> EngineResult<Strategy> {
        let id = self.id.to_string();
        let status = self
            .status
            .parse::<StrategyStatus>()
            .map_err(|reason| EngineError::CorruptRecord {
                id: id.clone(),
                reason,
            })?;
        let args: Value = serde_json::from_str(&self.args)?;
        Ok(Strategy {
            id: StrategyId(self.id),
            key: StrategyKey {
                provider_id: self.provider_id,
                service_id: self.service_id,
                strategy_hash: self.strategy_hash,
            },
            args,
            success_count: self.success_count.max(0) as u64,
            fail_count: self.fail_count.max(0) as u64,
            avg_latency_ms: self.avg_latency_ms,
            recent_success: self.recent_success,
            recent_fail: self.recent_fail,
            recent_as_of: from_millis(&id, self.recent_as_of)?,
            last_confirmed: self
                .last_confirmed
                .map(|ms| from_millis(&id, ms))
                .transpose()?,
            first_reported: from_millis(&id, self.first_reported)?,
            status,
        })
    }
}

struct ReportRow {
    id: i64,
    strategy_id: Option<i64>,
    fingerprint: String,
    reported_at: i64,
    success: bool,
    latency_ms: f64,
    client_version: String,
}

impl ReportRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            strategy_id: row.get(1)?,
            fingerprint: row.get(2)?,
            reported_at: row.get(3)?,
            success: row.get(4)?,
            latency_ms: row.get(5)?,
            client_version: row.get(6)?,
        })
    }

    fn decode(self) -> EngineResult<Report> {
        Ok(Report {
            id: ReportId(self.id),
            strategy_id: self.strategy_id.map(StrategyId),
            fingerprint: self.fingerprint,
            reported_at: from_millis(&format!("report {}", self.id), self.reported_at)?,
            success: self.success,
            latency_ms: self.latency_ms,
            client_version: self.client_version,
        })
    }
}

fn query_strategies<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> EngineResult<Vec<Strategy>> {
    let mut stmt = conn.prepare_cached(sql).map_err(to_store_err)?;
    let rows = stmt
        .query_map(params, StrategyRow::read)
        .map_err(to_store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(to_store_err)?;
    rows.into_iter().map(StrategyRow::decode).collect()
}

fn query_reports<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> EngineResult<Vec<Report>> {
    let mut stmt = conn.prepare_cached(sql).map_err(to_store_err)?;
    let rows = stmt
        .query_map(params, ReportRow::read)
        .map_err(to_store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(to_store_err)?;
    rows.into_iter().map(ReportRow::decode).collect()
}

fn strategy_by_key(conn: &Connection, key: &StrategyKey) -> EngineResult<Option<Strategy>> {
    let sql = queries::select_strategies(
        "provider_id = ?1 AND service_id = ?2 AND strategy_hash = ?3",
    );
    conn.query_row(
        &sql,
        params![key.provider_id, key.service_id, key.strategy_hash],
        StrategyRow::read,
    )
    .optional()
    .map_err(to_store_err)?
    .map(StrategyRow::decode)
    .transpose()
}

fn insert_strategy(conn: &Connection, strategy: &Strategy) -> EngineResult<usize> {
    let args = serde_json::to_string(&strategy.args)?;
    conn.execute(
        queries::build_strategy_insert(),
        params![
            strategy.key.provider_id,
            strategy.key.service_id,
            strategy.key.strategy_hash,
            args,
            strategy.success_count as i64,
            strategy.fail_count as i64,
            strategy.avg_latency_ms,
            strategy.recent_success,
            strategy.recent_fail,
            to_millis(strategy.recent_as_of),
            strategy.last_confirmed.map(to_millis),
            to_millis(strategy.first_reported),
            strategy.status.as_str(),
        ],
    )
    .map_err(to_store_err)
}

fn update_strategy(conn: &Connection, id: StrategyId, strategy: &Strategy) -> EngineResult<()> {
    conn.execute(
        queries::build_strategy_update(),
        params![
            id.0,
            strategy.success_count as i64,
            strategy.fail_count as i64,
            strategy.avg_latency_ms,
            strategy.recent_success,
            strategy.recent_fail,
            to_millis(strategy.recent_as_of),
            strategy.last_confirmed.map(to_millis),
            strategy.status.as_str(),
        ],
    )
    .map_err(to_store_err)?;
    Ok(())
}

fn insert_report(
    conn: &Connection,
    strategy_id: Option<StrategyId>,
    report: &NewReport,
) -> EngineResult<ReportId> {
    conn.execute(
        queries::build_report_insert(),
        params![
            strategy_id.map(|id| id.0),
            report.fingerprint,
            to_millis(report.reported_at),
            report.success,
            report.latency_ms,
            report.client_version,
        ],
    )
    .map_err(to_store_err)?;
    Ok(ReportId(conn.last_insert_rowid()))
}

fn apply_write_pragmas(conn: &Connection, busy_timeout: Duration) -> EngineResult<()> {
    conn.busy_timeout(busy_timeout).map_err(to_store_err)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .map_err(to_store_err)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(to_store_err)?;
    conn.pragma_update(None, "foreign_keys", true)
        .map_err(to_store_err)?;
    Ok(())
}

/// SQLite-backed strategy store, report ledger and service catalog.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    lock_timeout: Duration,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and apply the schema.
    pub fn open(path: &Path, config: &StoreConfig) -> EngineResult<Self> {
        let writer = Connection::open(path).map_err(to_store_err)?;
        apply_write_pragmas(&writer, config.lock_timeout())?;
        writer
            .execute_batch(queries::SCHEMA)
            .map_err(to_store_err)?;

        let size = config.read_pool_size.min(MAX_READ_POOL_SIZE);
        let mut readers = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(to_store_err)?;
            conn.busy_timeout(config.lock_timeout())
                .map_err(to_store_err)?;
            readers.push(Mutex::new(conn));
        }

        log::info!(
            "SQLITE_STORE_OPENED path={} read_pool={}",
            path.display(),
            readers.len()
        );

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            lock_timeout: config.lock_timeout(),
            db_path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database; reads share the write connection.
    pub fn open_in_memory(config: &StoreConfig) -> EngineResult<Self> {
        let writer = Connection::open_in_memory().map_err(to_store_err)?;
        apply_write_pragmas(&writer, config.lock_timeout())?;
        writer
            .execute_batch(queries::SCHEMA)
            .map_err(to_store_err)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            lock_timeout: config.lock_timeout(),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn writer(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.writer
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| EngineError::store_unavailable("write connection busy"))
    }

    fn with_reader<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T>,
    {
        if self.readers.is_empty() {
            return f(&*self.writer()?);
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| EngineError::store_unavailable("read connection busy"))?;
        f(&conn)
    }

    /// Insert catalog entries, leaving existing ids untouched. Returns the
    /// number of rows actually inserted.
    pub fn seed_catalog(&self, entries: &[ServiceCatalogEntry]) -> EngineResult<usize> {
        let mut conn = self.writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(to_store_err)?;
        let mut inserted = 0;
        for entry in entries {
            let domains = serde_json::to_string(&entry.domains)?;
            inserted += tx
                .execute(
                    queries::build_catalog_insert(),
                    params![
                        entry.id,
                        entry.display_name,
                        entry.category,
                        entry.main_domain,
                        domains,
                        entry.icon_emoji,
                    ],
                )
                .map_err(to_store_err)?;
        }
        tx.commit().map_err(to_store_err)?;
        log::info!(
            "CATALOG_SEEDED offered={} inserted={}",
            entries.len(),
            inserted
        );
        Ok(inserted)
    }

    fn query_catalog(&self, only_id: Option<&str>) -> EngineResult<Vec<ServiceCatalogEntry>> {
        self.with_reader(|conn| {
            let sql = match only_id {
                Some(_) => format!("{} WHERE id = ?1", queries::build_catalog_select()),
                None => format!("{} ORDER BY id", queries::build_catalog_select()),
            };
            let mut stmt = conn.prepare_cached(&sql).map_err(to_store_err)?;
            let read = |row: &Row<'_>| -> rusqlite::Result<(String, String, String, String, String, String)> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            };
            let rows = match only_id {
                Some(id) => stmt.query_map([id], read),
                None => stmt.query_map([], read),
            }
            .map_err(to_store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(to_store_err)?;

            rows.into_iter()
                .map(|(id, display_name, category, main_domain, domains, icon_emoji)| {
                    Ok(ServiceCatalogEntry {
                        id,
                        display_name,
                        category,
                        main_domain,
                        domains: serde_json::from_str(&domains)?,
                        icon_emoji,
                    })
                })
                .collect()
        })
    }
}

impl StrategyStore for SqliteStore {
    fn get(&self, key: &StrategyKey) -> EngineResult<Option<Strategy>> {
        self.with_reader(|conn| strategy_by_key(conn, key))
    }

    fn get_by_id(&self, id: StrategyId) -> EngineResult<Option<Strategy>> {
        self.with_reader(|conn| {
            let sql = queries::select_strategies("id = ?1");
            Ok(query_strategies(conn, &sql, [id.0])?.into_iter().next())
        })
    }

    fn commit(
        &self,
        key: &StrategyKey,
        report: &NewReport,
        fold: StrategyFold<'_>,
    ) -> EngineResult<Committed> {
        let mut conn = self.writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(to_store_err)?;

        let current = strategy_by_key(&tx, key)?;
        let mut next = fold(current.as_ref());
        next.key = key.clone();

        let id = match &current {
            Some(existing) => {
                update_strategy(&tx, existing.id, &next)?;
                existing.id
            }
            None => {
                if insert_strategy(&tx, &next)? == 0 {
                    // Lost a create race; dropping `tx` rolls back.
                    return Err(EngineError::ConcurrencyConflict {
                        key: key.to_string(),
                        attempts: 1,
                    });
                }
                StrategyId(tx.last_insert_rowid())
            }
        };
        next.id = id;

        let report_id = insert_report(&tx, Some(id), report)?;
        tx.commit().map_err(to_store_err)?;

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
        let mut conn = self.writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(to_store_err)?;

        let mut strategy = match strategy_by_key(&tx, key)? {
            Some(strategy) => strategy,
            None => return Ok(None),
        };
        let previous_status = strategy.status;
        let status = evaluate(&strategy);
        if status == previous_status {
            return Ok(None);
        }
        tx.execute(
            queries::build_status_update(),
            params![strategy.id.0, status.as_str()],
        )
        .map_err(to_store_err)?;
        tx.commit().map_err(to_store_err)?;

        strategy.status = status;
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
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = queries::select_strategies(&format!(
            "provider_id = ?1 AND service_id = ?2 AND status IN ({})",
            queries::placeholders(statuses.len(), 3)
        ));
        let mut values = vec![provider_id.to_string(), service_id.to_string()];
        values.extend(statuses.iter().map(|s| s.as_str().to_string()));
        self.with_reader(|conn| query_strategies(conn, &sql, params_from_iter(values.iter())))
    }

    fn list_for_service_any_provider(
        &self,
        service_id: &str,
        statuses: &[StrategyStatus],
    ) -> EngineResult<Vec<Strategy>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = queries::select_strategies(&format!(
            "service_id = ?1 AND status IN ({})",
            queries::placeholders(statuses.len(), 2)
        ));
        let mut values = vec![service_id.to_string()];
        values.extend(statuses.iter().map(|s| s.as_str().to_string()));
        self.with_reader(|conn| query_strategies(conn, &sql, params_from_iter(values.iter())))
    }

    fn stale_candidates(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<StrategyKey>> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare_cached(queries::build_stale_candidates())
                .map_err(to_store_err)?;
            let keys = stmt
                .query_map([to_millis(cutoff)], |row| {
                    Ok(StrategyKey {
                        provider_id: row.get(0)?,
                        service_id: row.get(1)?,
                        strategy_hash: row.get(2)?,
                    })
                })
                .map_err(to_store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(to_store_err)?;
            Ok(keys)
        })
    }

    fn status_counts(&self) -> EngineResult<StatusCounts> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare_cached(queries::build_status_counts())
                .map_err(to_store_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(to_store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(to_store_err)?;

            let mut counts = StatusCounts::default();
            for (status, count) in rows {
                let count = count.max(0) as u64;
                counts.total += count;
                match status.parse::<StrategyStatus>() {
                    Ok(StrategyStatus::Unconfirmed) => counts.unconfirmed += count,
                    Ok(StrategyStatus::Confirmed) => counts.confirmed += count,
                    Ok(StrategyStatus::Deprecated) => counts.deprecated += count,
                    Err(reason) => {
                        return Err(EngineError::CorruptRecord {
                            id: "strategies.status".to_string(),
                            reason,
                        })
                    }
                }
            }
            Ok(counts)
        })
    }

    fn servable_counts_by_service(&self, provider_id: &str) -> EngineResult<HashMap<String, u64>> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare_cached(queries::build_servable_counts())
                .map_err(to_store_err)?;
            let rows = stmt
                .query_map([provider_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(to_store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(to_store_err)?;
            Ok(rows
                .into_iter()
                .map(|(service, count)| (service, count.max(0) as u64))
                .collect())
        })
    }
}

impl ReportLedger for SqliteStore {
    fn append(&self, strategy_id: Option<StrategyId>, report: &NewReport) -> EngineResult<ReportId> {
        let conn = self.writer()?;
        insert_report(&conn, strategy_id, report)
    }

    fn recent_by_fingerprint(
        &self,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<Report>> {
        let sql = queries::select_reports(
            "fingerprint = ?1 AND reported_at > ?2 ORDER BY reported_at, id",
        );
        self.with_reader(|conn| query_reports(conn, &sql, params![fingerprint, to_millis(since)]))
    }

    fn by_strategy(&self, strategy_id: StrategyId) -> EngineResult<Vec<Report>> {
        let sql = queries::select_reports("strategy_id = ?1 ORDER BY reported_at, id");
        self.with_reader(|conn| query_reports(conn, &sql, [strategy_id.0]))
    }
}

impl ServiceCatalog for SqliteStore {
    fn get_service(&self, service_id: &str) -> EngineResult<Option<ServiceCatalogEntry>> {
        Ok(self.query_catalog(Some(service_id))?.into_iter().next())
    }

    fn list_services(&self) -> EngineResult<Vec<ServiceCatalogEntry>> {
        self.query_catalog(None)
    }
}
