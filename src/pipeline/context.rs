//! Request context management.
//!
//! Gives each submission, batch and sweep a short id for log correlation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::logging::structured::LogContext;

/// Context for one engine call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(received_at: DateTime<Utc>) -> Self {
        Self::with_prefix("req", received_at)
    }

    pub fn batch(received_at: DateTime<Utc>) -> Self {
        Self::with_prefix("batch", received_at)
    }

    pub fn sweep(received_at: DateTime<Utc>) -> Self {
        Self::with_prefix("sweep", received_at)
    }

    fn with_prefix(prefix: &str, received_at: DateTime<Utc>) -> Self {
        let request_id = format!("{}-{}", prefix, &Uuid::new_v4().to_string()[..8]);
        Self {
            request_id,
            received_at,
        }
    }

    /// Context for item `index` of a batch.
    pub fn item(&self, index: usize) -> Self {
        Self {
            request_id: format!("{}#{}", self.request_id, index),
            received_at: self.received_at,
        }
    }

    pub fn log_context(&self) -> LogContext {
        LogContext::new(&self.request_id)
    }
}
