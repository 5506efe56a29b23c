//! Sliding-window abuse guard.
//!
//! Decides from the fingerprint's own recent ledger entries only. The query
//! is bounded by the longest configured window.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::admission::decision::{Admission, Denial};
use crate::config::RateLimitConfig;
use crate::error::EngineResult;
use crate::logging::structured::LogContext;
use crate::storage::{Report, ReportLedger, StrategyId};

/// Per-fingerprint admission control.
#[derive(Debug, Clone)]
pub struct AbuseGuard {
    config: RateLimitConfig,
}

impl AbuseGuard {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Earliest report time any check looks at (exclusive).
    pub fn lookback_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.lookback()
    }

    /// Decide whether a report from `fingerprint` may be accepted at `now`.
    ///
    /// `strategy` is the id the report resolves to, or `None` for a strategy
    /// that does not exist yet. Reads the ledger, never writes it.
    pub fn admit(
        &self,
        ledger: &dyn ReportLedger,
        fingerprint: &str,
        strategy: Option<StrategyId>,
        now: DateTime<Utc>,
        ctx: &LogContext,
    ) -> EngineResult<Admission> {
        let recent = ledger.recent_by_fingerprint(fingerprint, self.lookback_start(now))?;
        let admission = self.decide(&recent, strategy, now);

        match &admission {
            Admission::Allow => log::debug!(
                "{} ADMISSION_ALLOW recent={}",
                ctx,
                recent.len()
            ),
            Admission::Deny(denial) => log::warn!(
                "{} ADMISSION_DENY reason={} detail=\"{}\"",
                ctx,
                denial.as_str(),
                denial
            ),
        }
        Ok(admission)
    }

    /// Pure decision over a fingerprint's recent reports.
    pub fn decide(
        &self,
        recent: &[Report],
        strategy: Option<StrategyId>,
        now: DateTime<Utc>,
    ) -> Admission {
        let window_start = now - self.config.window();
        let in_window: Vec<&Report> = recent
            .iter()
            .filter(|r| r.reported_at > window_start)
            .collect();

        let limit = self.config.max_reports_per_window;
        if in_window.len() >= limit {
            return Admission::Deny(Denial::FingerprintWindowExceeded {
                count: in_window.len(),
                limit,
            });
        }

        if let Some(id) = strategy {
            let strategy_start = now - self.config.strategy_window();
            let count = recent
                .iter()
                .filter(|r| r.strategy_id == Some(id) && r.reported_at > strategy_start)
                .count();
            let limit = self.config.max_reports_per_strategy_window;
            if count >= limit {
                return Admission::Deny(Denial::StrategyWindowExceeded { count, limit });
            }
        }

        let distinct: HashSet<StrategyId> =
            in_window.iter().filter_map(|r| r.strategy_id).collect();
        let already_counted = strategy.map_or(false, |id| distinct.contains(&id));
        let limit = self.config.max_distinct_strategies_per_window;
        if !already_counted && distinct.len() >= limit {
            return Admission::Deny(Denial::TooManyDistinctStrategies {
                distinct: distinct.len(),
                limit,
            });
        }

        Admission::Allow
    }
}
