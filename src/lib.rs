//! Strategy Reputation - crowdsourced DPI-bypass strategy ranking
//!
//! This crate turns a stream of untrusted client reports ("strategy X worked
//! for service Y on provider Z") into a confidence-ranked set of strategies,
//! while resisting report flooding and poisoning through fingerprint-based
//! rate limiting. The implementation prioritizes:
//!
//! 1. **Correctness** - No lost updates; per-key serialized aggregation
//! 2. **Abuse resistance** - Sliding-window admission before any write
//! 3. **Logging** - Every decision point logged with request context
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `pipeline` - `ReputationEngine`: submission, reads, maintenance sweep
//! - `admission` - Sliding-window abuse guard and per-fingerprint gates
//! - `reputation` - Aggregation fold, status state machine, ranking
//! - `validation` - Boundary checks and the service catalog cache
//! - `security` - Strategy hashing, PII screening, payload sanitation
//! - `storage` - Store traits, in-memory and SQLite backends
//! - `config` - Thresholds and limits
//! - `logging` - Structured logging with request context
//!
//! ## Example
//!
//! ```no_run
//! use chrono::Utc;
//! use serde_json::json;
//! use strategy_reputation::{EngineConfig, ReportSubmission, ReputationEngine};
//!
//! strategy_reputation::init_logger();
//! let engine = ReputationEngine::open_sqlite("reputation.db", EngineConfig::from_env()?)?;
//!
//! let report = ReportSubmission {
//!     provider_id: "rostelecom".to_string(),
//!     service_id: "youtube".to_string(),
//!     args: json!(["--dpi-desync=fake,split2", "--dpi-desync-ttl=5"]),
//!     claimed_hash: None,
//!     success: true,
//!     latency_ms: 180.0,
//!     fingerprint: "9f2c4e7a1b3d5f60".to_string(),
//!     client_version: "podsos/1.4.2".to_string(),
//! };
//! engine.submit(&report, Utc::now())?;
//!
//! for ranked in engine.recommend("rostelecom", "youtube", Utc::now())? {
//!     println!("{} {:.2}", ranked.strategy.args, ranked.score);
//! }
//! # Ok::<(), strategy_reputation::EngineError>(())
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod reputation;
pub mod security;
pub mod storage;
pub mod validation;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorKind, InvalidReport};
pub use pipeline::{
    BatchResult, HealthReport, ReputationEngine, ServiceOverview, SubmitOutcome, SweepOutcome,
};
pub use reputation::{RankSource, RankedStrategy};
pub use storage::{MemoryStore, SqliteStore, Strategy, StrategyKey, StrategyStatus};
pub use validation::ReportSubmission;

/// Initialize the process-wide logger.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .try_init();
}
