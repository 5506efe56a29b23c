//! Reputation module.
//!
//! Turns admitted reports into ranked strategies:
//! - Aggregation of reports into per-strategy counters (serialized per key)
//! - Status state machine (unconfirmed / confirmed / deprecated)
//! - Ranking and provider fallback for the read path

pub mod aggregation;
pub mod ranking;
pub mod status;

pub use aggregation::*;
pub use ranking::*;
pub use status::*;
