//! Structured logging utilities.
//!
//! Provides context-aware logging with the request id, fingerprint tag and
//! strategy key included in every log message.

use std::fmt;

/// Logging context for one submission or read request.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub request_id: String,
    /// Hash-derived tag; raw fingerprints never reach the log.
    pub fingerprint_tag: Option<String>,
    pub strategy: Option<String>,
}

impl LogContext {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            fingerprint_tag: None,
            strategy: None,
        }
    }

    pub fn with_fingerprint_tag(&self, tag: &str) -> Self {
        Self {
            fingerprint_tag: Some(tag.to_string()),
            ..self.clone()
        }
    }

    pub fn with_strategy(&self, strategy: &str) -> Self {
        Self {
            strategy: Some(strategy.to_string()),
            ..self.clone()
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[req={}]", self.request_id)?;
        if let Some(tag) = &self.fingerprint_tag {
            write!(f, " [fp={}]", tag)?;
        }
        if let Some(strategy) = &self.strategy {
            write!(f, " [strategy={}]", strategy)?;
        }
        Ok(())
    }
}

/// Log an info message with context: `EVENT key=value ...`.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $event:expr $(, $key:ident = $value:expr)* $(,)?) => {
        log::info!(
            concat!("{} {}", $(" ", stringify!($key), "={}"),*),
            $ctx,
            $event
            $(, $value)*
        )
    };
}

/// Log a warning message with context.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $event:expr $(, $key:ident = $value:expr)* $(,)?) => {
        log::warn!(
            concat!("{} {}", $(" ", stringify!($key), "={}"),*),
            $ctx,
            $event
            $(, $value)*
        )
    };
}

/// Log an error message with context.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $event:expr $(, $key:ident = $value:expr)* $(,)?) => {
        log::error!(
            concat!("{} {}", $(" ", stringify!($key), "={}"),*),
            $ctx,
            $event
            $(, $value)*
        )
    };
}
