//! Admission control.
//!
//! Decides whether an incoming report may be accepted before it touches the
//! ledger or any aggregate:
//! - Sliding-window limits per fingerprint (overall, per strategy, distinct strategies)
//! - Per-fingerprint gates ordering checks against appends

pub mod decision;
pub mod gate;
pub mod guard;

pub use decision::*;
pub use gate::*;
pub use guard::*;
