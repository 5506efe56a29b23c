//! Periodic maintenance.
//!
//! Demotes strategies nobody has confirmed within `T_stale` and drops idle
//! fingerprint gates. Each record is re-evaluated through the same per-key
//! serialized path as report aggregation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::EngineResult;
use crate::storage::{Store, StrategyStatus};
use crate::{log_info, log_warn};

use super::context::RequestContext;
use super::ingestion::ReputationEngine;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub examined: usize,
    pub deprecated: usize,
    pub failed: usize,
    pub gates_pruned: usize,
}

impl<S: Store> ReputationEngine<S> {
    /// Re-evaluate every servable strategy whose last evidence predates
    /// `now - T_stale`. A record that fails to update is counted and skipped.
    pub fn sweep(&self, now: DateTime<Utc>) -> EngineResult<SweepOutcome> {
        let request = RequestContext::sweep(now);
        let ctx = request.log_context();
        let cutoff = now - self.config.status.stale_after();

        let candidates = self.store.stale_candidates(cutoff)?;
        let mut outcome = SweepOutcome {
            examined: candidates.len(),
            ..SweepOutcome::default()
        };

        for key in &candidates {
            let key_ctx = ctx.with_strategy(&key.short());
            match self
                .aggregator
                .reevaluate(self.store.as_ref(), key, now, &key_ctx)
            {
                Ok(Some(changed)) if changed.strategy.status == StrategyStatus::Deprecated => {
                    outcome.deprecated += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    log_warn!(key_ctx, "SWEEP_ITEM_FAILED", error = err);
                    outcome.failed += 1;
                }
            }
        }

        outcome.gates_pruned = self.gates.prune_idle();

        log_info!(
            ctx,
            "SWEEP_COMPLETE",
            examined = outcome.examined,
            deprecated = outcome.deprecated,
            failed = outcome.failed,
            gates_pruned = outcome.gates_pruned
        );
        Ok(outcome)
    }
}
