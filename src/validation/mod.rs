//! Validation module.
//!
//! Boundary checks for submitted reports and the cached service catalog
//! they are checked against.

pub mod catalog;
pub mod report;

pub use catalog::*;
pub use report::*;
