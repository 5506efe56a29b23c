//! Read path: ranked strategies per (provider, service).
//!
//! Only aggregate fields leave this module; reports and fingerprints are
//! never consulted. Statuses are re-evaluated at read time without writing,
//! so a record that went stale since its last update is not served.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{RankingConfig, StatusThresholds};
use crate::error::EngineResult;
use crate::reputation::status::effective_status;
use crate::storage::{Strategy, StrategyStatus, StrategyStore};

/// Where a ranked result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankSource {
    /// The requested provider.
    Provider,
    /// A confirmed strategy from another provider for the same service.
    Fallback,
}

impl RankSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankSource::Provider => "provider",
            RankSource::Fallback => "fallback",
        }
    }
}

/// One entry of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedStrategy {
    pub strategy: Strategy,
    pub effective_status: StrategyStatus,
    pub score: f64,
    pub success_rate: f64,
    pub source: RankSource,
}

impl RankedStrategy {
    fn new(strategy: Strategy, effective_status: StrategyStatus, source: RankSource) -> Self {
        Self {
            score: strategy.score(),
            success_rate: strategy.success_ratio(),
            strategy,
            effective_status,
            source,
        }
    }
}

/// Status first (confirmed before unconfirmed), then score descending, then
/// latency ascending, then most recently confirmed. Ids break exact ties.
pub fn compare_ranked(a: &RankedStrategy, b: &RankedStrategy) -> Ordering {
    a.effective_status
        .rank()
        .cmp(&b.effective_status.rank())
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| {
            a.strategy
                .avg_latency_ms
                .total_cmp(&b.strategy.avg_latency_ms)
        })
        .then_with(|| b.strategy.last_confirmed.cmp(&a.strategy.last_confirmed))
        .then_with(|| a.strategy.id.cmp(&b.strategy.id))
}

/// Evaluate, filter out anything not servable, and sort.
pub fn rank(
    candidates: Vec<Strategy>,
    thresholds: &StatusThresholds,
    now: DateTime<Utc>,
    source: RankSource,
) -> Vec<RankedStrategy> {
    let mut ranked: Vec<RankedStrategy> = candidates
        .into_iter()
        .filter_map(|strategy| {
            let status = effective_status(&strategy, thresholds, now);
            status
                .is_servable()
                .then(|| RankedStrategy::new(strategy, status, source))
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}

/// Ranking queries against a strategy store.
#[derive(Debug, Clone)]
pub struct Ranker {
    thresholds: StatusThresholds,
    config: RankingConfig,
}

impl Ranker {
    pub fn new(thresholds: StatusThresholds, config: RankingConfig) -> Self {
        Self { thresholds, config }
    }

    /// Best servable strategies for exactly this provider.
    pub fn best_strategies(
        &self,
        store: &dyn StrategyStore,
        provider_id: &str,
        service_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<RankedStrategy>> {
        let candidates =
            store.list_for_service(provider_id, service_id, &StrategyStatus::SERVABLE)?;
        let mut ranked = rank(candidates, &self.thresholds, now, RankSource::Provider);
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Provider results, topped up with strong confirmed strategies from
    /// other providers when the provider has too few.
    pub fn recommend(
        &self,
        store: &dyn StrategyStore,
        provider_id: &str,
        service_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<RankedStrategy>> {
        let max = self.config.max_results;
        let mut results = self.best_strategies(store, provider_id, service_id, max, now)?;
        if results.len() >= self.config.min_provider_results || results.len() >= max {
            return Ok(results);
        }

        let mut seen: HashSet<String> = results
            .iter()
            .map(|r| r.strategy.key.strategy_hash.clone())
            .collect();
        let others: Vec<Strategy> = store
            .list_for_service_any_provider(service_id, &[StrategyStatus::Confirmed])?
            .into_iter()
            .filter(|s| s.key.provider_id != provider_id)
            .filter(|s| s.success_ratio() >= self.config.fallback_min_ratio)
            .collect();

        for candidate in rank(others, &self.thresholds, now, RankSource::Fallback) {
            if results.len() >= max {
                break;
            }
            if candidate.effective_status != StrategyStatus::Confirmed {
                continue;
            }
            if seen.insert(candidate.strategy.key.strategy_hash.clone()) {
                results.push(candidate);
            }
        }
        Ok(results)
    }
}
