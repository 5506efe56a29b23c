//! Pipeline orchestration module.
//!
//! The engine entry points:
//! - Report submission (single and batch)
//! - Ranked strategy reads and provider fallback
//! - Catalog, overview and health queries
//! - Maintenance sweep

pub mod context;
pub mod ingestion;
pub mod maintenance;

pub use context::*;
pub use ingestion::*;
pub use maintenance::*;
