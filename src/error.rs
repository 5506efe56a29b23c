//! Engine error types.
//!
//! Rate-limit denials and missing lookups are ordinary return values
//! (`SubmitOutcome::RateLimited`, `Option::None`), not errors. Everything
//! in here is either a rejected input or a store fault.

use thiserror::Error;

/// Coarse classification shared by errors and non-error outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    RateLimited,
    InvalidReport,
    StoreUnavailable,
    ConcurrencyConflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidReport => "invalid_report",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Why a submission was rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidReport {
    #[error("field `{field}` is empty")]
    EmptyField { field: &'static str },

    #[error("field `{field}` is {len} chars, allowed {min}..={max}")]
    FieldLength {
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },

    #[error("field `{field}` contains characters outside the allowed set")]
    FieldCharset { field: &'static str },

    #[error("fingerprint looks like raw personal data ({kind})")]
    FingerprintLooksLikePii { kind: &'static str },

    #[error("latency {latency_ms} ms outside 0..={max_ms}")]
    LatencyOutOfRange { latency_ms: f64, max_ms: f64 },

    #[error("strategy args are empty")]
    EmptyArgs,

    #[error("strategy args too large: {bytes} bytes, limit {limit}")]
    ArgsTooLarge { bytes: usize, limit: usize },

    #[error("strategy args nested {depth} levels, limit {limit}")]
    ArgsTooDeep { depth: usize, limit: usize },

    #[error("strategy hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch { claimed: String, computed: String },

    #[error("unknown service `{service_id}`")]
    UnknownService { service_id: String },
}

impl InvalidReport {
    /// Short machine-readable reason for logs and API bodies.
    pub fn reason_code(&self) -> &'static str {
        match self {
            InvalidReport::EmptyField { .. } => "empty_field",
            InvalidReport::FieldLength { .. } => "field_length",
            InvalidReport::FieldCharset { .. } => "field_charset",
            InvalidReport::FingerprintLooksLikePii { .. } => "fingerprint_pii",
            InvalidReport::LatencyOutOfRange { .. } => "latency_out_of_range",
            InvalidReport::EmptyArgs => "empty_args",
            InvalidReport::ArgsTooLarge { .. } => "args_too_large",
            InvalidReport::ArgsTooDeep { .. } => "args_too_deep",
            InvalidReport::HashMismatch { .. } => "hash_mismatch",
            InvalidReport::UnknownService { .. } => "unknown_service",
        }
    }
}

/// Errors returned by the engine and its stores.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("invalid report: {0}")]
    InvalidReport(#[from] InvalidReport),

    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("concurrent update on {key} not applied after {attempts} attempt(s)")]
    ConcurrencyConflict { key: String, attempts: u32 },

    #[error("stored record {id} is corrupt: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        EngineError::StoreUnavailable {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidReport(_) => ErrorKind::InvalidReport,
            EngineError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            EngineError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            EngineError::CorruptRecord { .. }
            | EngineError::Serialization(_)
            | EngineError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Transient faults: the caller (or the internal retry loop) may resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StoreUnavailable { .. } | EngineError::ConcurrencyConflict { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
