//! Admission decisions.
//!
//! A denial is a normal outcome, not an error.

use std::fmt;

use crate::error::ErrorKind;

/// Why a report was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Fingerprint hit its ceiling across all strategies.
    FingerprintWindowExceeded { count: usize, limit: usize },
    /// Fingerprint already reported this strategy within the short window.
    StrategyWindowExceeded { count: usize, limit: usize },
    /// Fingerprint is spreading reports over too many strategies.
    TooManyDistinctStrategies { distinct: usize, limit: usize },
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::FingerprintWindowExceeded { .. } => "fingerprint_window_exceeded",
            Denial::StrategyWindowExceeded { .. } => "strategy_window_exceeded",
            Denial::TooManyDistinctStrategies { .. } => "too_many_distinct_strategies",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RateLimited
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::FingerprintWindowExceeded { count, limit }
            | Denial::StrategyWindowExceeded { count, limit } => {
                write!(f, "{} ({}/{})", self.as_str(), count, limit)
            }
            Denial::TooManyDistinctStrategies { distinct, limit } => {
                write!(f, "{} ({}/{})", self.as_str(), distinct, limit)
            }
        }
    }
}

/// Admission decision for one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny(Denial),
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Allow => "allow",
            Admission::Deny(_) => "deny",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}
