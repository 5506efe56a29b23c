//! Structured logging with request context.
//!
//! Every log line carries the request id, and where known the fingerprint
//! tag and strategy key, so a single submission can be followed end to end.

pub mod structured;

pub use structured::*;
