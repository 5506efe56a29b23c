//! SQL text for the SQLite store.
//!
//! Timestamps are stored as Unix milliseconds so range predicates and the
//! `last_confirmed` index compare numerically.

/// Schema: the three tables and their indexes. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS strategies (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id     TEXT    NOT NULL,
    service_id      TEXT    NOT NULL,
    strategy_hash   TEXT    NOT NULL,
    args            TEXT    NOT NULL,
    success_count   INTEGER NOT NULL DEFAULT 1 CHECK (success_count >= 0),
    fail_count      INTEGER NOT NULL DEFAULT 0 CHECK (fail_count >= 0),
    avg_latency_ms  REAL    NOT NULL DEFAULT 0 CHECK (avg_latency_ms >= 0),
    recent_success  REAL    NOT NULL DEFAULT 0,
    recent_fail     REAL    NOT NULL DEFAULT 0,
    recent_as_of    INTEGER NOT NULL,
    last_confirmed  INTEGER,
    first_reported  INTEGER NOT NULL,
    status          TEXT    NOT NULL DEFAULT 'unconfirmed'
                    CHECK (status IN ('unconfirmed', 'confirmed', 'deprecated')),
    UNIQUE (provider_id, service_id, strategy_hash)
);

CREATE INDEX IF NOT EXISTS idx_strategies_lookup
    ON strategies (provider_id, service_id, status);
CREATE INDEX IF NOT EXISTS idx_strategies_last_confirmed
    ON strategies (last_confirmed);

CREATE TABLE IF NOT EXISTS reports (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id     INTEGER REFERENCES strategies (id) ON DELETE CASCADE,
    fingerprint     TEXT    NOT NULL,
    reported_at     INTEGER NOT NULL,
    success         INTEGER NOT NULL,
    latency_ms      REAL    NOT NULL DEFAULT 0 CHECK (latency_ms >= 0),
    client_version  TEXT    NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_reports_fingerprint_time
    ON reports (fingerprint, reported_at);
CREATE INDEX IF NOT EXISTS idx_reports_strategy
    ON reports (strategy_id);

CREATE TABLE IF NOT EXISTS services_catalog (
    id              TEXT PRIMARY KEY,
    display_name    TEXT NOT NULL,
    category        TEXT NOT NULL,
    main_domain     TEXT NOT NULL,
    domains         TEXT NOT NULL DEFAULT '[]',
    icon_emoji      TEXT NOT NULL DEFAULT ''
);
"#;

/// Columns of `strategies` in the order `StrategyRow::read` expects.
pub const STRATEGY_COLUMNS: &[&str] = &[
    "id",
    "provider_id",
    "service_id",
    "strategy_hash",
    "args",
    "success_count",
    "fail_count",
    "avg_latency_ms",
    "recent_success",
    "recent_fail",
    "recent_as_of",
    "last_confirmed",
    "first_reported",
    "status",
];

/// Columns of `reports` in the order `ReportRow::read` expects.
pub const REPORT_COLUMNS: &[&str] = &[
    "id",
    "strategy_id",
    "fingerprint",
    "reported_at",
    "success",
    "latency_ms",
    "client_version",
];

fn select_from(table: &str, columns: &[&str], predicate: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        table,
        predicate
    )
}

/// Build a strategy SELECT with the given WHERE clause.
pub fn select_strategies(predicate: &str) -> String {
    select_from("strategies", STRATEGY_COLUMNS, predicate)
}

/// Build a report SELECT with the given WHERE clause.
pub fn select_reports(predicate: &str) -> String {
    select_from("reports", REPORT_COLUMNS, predicate)
}

/// `?`-placeholders for an `IN (...)` list.
pub fn placeholders(count: usize, first_index: usize) -> String {
    (first_index..first_index + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Get-or-create: inserting a key that already exists is a no-op.
pub fn build_strategy_insert() -> &'static str {
    r#"
    INSERT INTO strategies
        (provider_id, service_id, strategy_hash, args,
         success_count, fail_count, avg_latency_ms,
         recent_success, recent_fail, recent_as_of,
         last_confirmed, first_reported, status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
    ON CONFLICT (provider_id, service_id, strategy_hash) DO NOTHING
    "#
}

/// Replace the mutable aggregate fields of one strategy.
pub fn build_strategy_update() -> &'static str {
    r#"
    UPDATE strategies SET
        success_count = ?2,
        fail_count = ?3,
        avg_latency_ms = ?4,
        recent_success = ?5,
        recent_fail = ?6,
        recent_as_of = ?7,
        last_confirmed = ?8,
        status = ?9
    WHERE id = ?1
    "#
}

pub fn build_status_update() -> &'static str {
    "UPDATE strategies SET status = ?2 WHERE id = ?1"
}

pub fn build_report_insert() -> &'static str {
    r#"
    INSERT INTO reports
        (strategy_id, fingerprint, reported_at, success, latency_ms, client_version)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    "#
}

/// Seed insert: existing catalog rows are left untouched.
pub fn build_catalog_insert() -> &'static str {
    r#"
    INSERT INTO services_catalog
        (id, display_name, category, main_domain, domains, icon_emoji)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT (id) DO NOTHING
    "#
}

pub fn build_catalog_select() -> &'static str {
    "SELECT id, display_name, category, main_domain, domains, icon_emoji FROM services_catalog"
}

/// Non-deprecated strategies whose last evidence predates `?1`.
pub fn build_stale_candidates() -> &'static str {
    r#"
    SELECT provider_id, service_id, strategy_hash FROM strategies
    WHERE status != 'deprecated'
      AND ((last_confirmed IS NOT NULL AND last_confirmed < ?1)
           OR (last_confirmed IS NULL AND first_reported < ?1))
    "#
}

pub fn build_status_counts() -> &'static str {
    "SELECT status, COUNT(*) FROM strategies GROUP BY status"
}

pub fn build_servable_counts() -> &'static str {
    r#"
    SELECT service_id, COUNT(*) FROM strategies
    WHERE provider_id = ?1 AND status IN ('unconfirmed', 'confirmed')
    GROUP BY service_id
    "#
}
