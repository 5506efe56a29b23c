//! Security module.
//!
//! Strategy hashing, fingerprint tags, PII screening and payload sanitation.

pub mod hashing;
pub mod pii;
pub mod sanitizer;

pub use hashing::*;
pub use pii::*;
pub use sanitizer::*;
