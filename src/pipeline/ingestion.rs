//! Report ingestion and the read API.
//!
//! A submission goes through:
//! 1. Boundary validation (fields, payload, catalog)
//! 2. Per-fingerprint gate
//! 3. Sliding-window admission against the fingerprint's recent ledger
//! 4. Aggregation: strategy update and ledger append in one commit
//! 5. Status re-evaluation (inside the aggregation fold)
//!
//! A denial at step 3 leaves the ledger and every aggregate untouched.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::{Admission, AbuseGuard, Denial, FingerprintGates};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::reputation::{Aggregator, RankSource, RankedStrategy, Ranker};
use crate::storage::{
    MemoryStore, Report, ReportId, ServiceCatalog, ServiceCatalogEntry, SqliteStore, StatusCounts,
    Store, StrategyId, StrategyStatus,
};
use crate::validation::{
    builtin_catalog, validate_submission, CatalogCache, ReportSubmission, CATALOG_CACHE_TTL_SECS,
};
use crate::{log_info, log_warn};

use super::context::RequestContext;

/// Result of a submission that was not a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted {
        strategy_id: StrategyId,
        status: StrategyStatus,
        report_id: ReportId,
        created: bool,
    },
    /// Ignored by admission control; nothing was written.
    RateLimited { reason: Denial },
}

impl SubmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitOutcome::Accepted { .. } => "accepted",
            SubmitOutcome::RateLimited { .. } => "rate_limited",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted { .. })
    }
}

/// Result of processing a batch.
#[derive(Debug)]
pub struct BatchResult {
    pub received_count: usize,
    pub accepted_count: usize,
    pub rate_limited_count: usize,
    pub rejected_count: usize,
    pub failed_count: usize,
    /// One entry per submission, in input order.
    pub results: Vec<EngineResult<SubmitOutcome>>,
}

/// A catalog entry with the number of strategies a provider can be served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOverview {
    pub service: ServiceCatalogEntry,
    pub strategy_count: u64,
}

/// Engine health statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub strategies: StatusCounts,
    pub catalog_services: usize,
}

/// The strategy reputation engine.
pub struct ReputationEngine<S: Store> {
    pub(super) store: Arc<S>,
    pub(super) catalog: Arc<dyn ServiceCatalog>,
    pub(super) config: EngineConfig,
    pub(super) guard: AbuseGuard,
    pub(super) gates: FingerprintGates,
    pub(super) aggregator: Aggregator,
    pub(super) ranker: Ranker,
}

impl ReputationEngine<MemoryStore> {
    /// Engine over a fresh in-memory store and the built-in catalog.
    pub fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        let store = Arc::new(MemoryStore::from_config(&config.store));
        let catalog = Arc::new(CatalogCache::builtin()?);
        Self::new(store, catalog, config)
    }
}

impl ReputationEngine<SqliteStore> {
    /// Open (or create) a SQLite database, seed the built-in catalog into it
    /// without overwriting existing rows, and serve the stored catalog through
    /// a cache that reloads every `CATALOG_CACHE_TTL_SECS`.
    pub fn open_sqlite<P: AsRef<Path>>(path: P, config: EngineConfig) -> EngineResult<Self> {
        let store = Arc::new(SqliteStore::open(path.as_ref(), &config.store)?);
        let seeded = store.seed_catalog(&builtin_catalog()?)?;

        let source: Arc<dyn ServiceCatalog> = store.clone();
        let catalog = CatalogCache::backed_by(source, Duration::from_secs(CATALOG_CACHE_TTL_SECS))?;
        log::info!(
            "SQLITE_ENGINE_OPEN path={} catalog_seeded={} catalog_services={}",
            path.as_ref().display(),
            seeded,
            catalog.len()
        );
        Self::new(store, Arc::new(catalog), config)
    }
}

impl<S: Store> ReputationEngine<S> {
    pub fn new(
        store: Arc<S>,
        catalog: Arc<dyn ServiceCatalog>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            guard: AbuseGuard::new(config.rate_limit.clone()),
            gates: FingerprintGates::new(config.store.lock_timeout()),
            aggregator: Aggregator::new(config.status.clone(), config.store.clone()),
            ranker: Ranker::new(config.status.clone(), config.ranking.clone()),
            store,
            catalog,
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit one report received at `now`.
    ///
    /// `Ok(RateLimited)` is a normal outcome. `Err` is either a rejected
    /// input (`InvalidReport`) or a fault the caller should retry
    /// (`EngineError::is_retryable`).
    pub fn submit(
        &self,
        submission: &ReportSubmission,
        now: DateTime<Utc>,
    ) -> EngineResult<SubmitOutcome> {
        self.submit_with_context(submission, now, &RequestContext::new(now))
    }

    fn submit_with_context(
        &self,
        submission: &ReportSubmission,
        now: DateTime<Utc>,
        request: &RequestContext,
    ) -> EngineResult<SubmitOutcome> {
        let ctx = request.log_context();
        let checked = validate_submission(
            submission,
            self.catalog.as_ref(),
            &self.config.limits,
            now,
            &ctx,
        );
        let validated = match checked {
            Ok(validated) => validated,
            Err(err) => {
                let reason = match &err {
                    EngineError::InvalidReport(reason) => reason.reason_code(),
                    other => other.kind().as_str(),
                };
                log_warn!(ctx, "REPORT_REJECTED", reason = reason, error = err);
                return Err(err);
            }
        };

        let ctx = ctx
            .with_fingerprint_tag(&validated.fingerprint_tag)
            .with_strategy(&validated.key.short());
        let fingerprint = validated.report.fingerprint.as_str();

        let result = self.gates.run(fingerprint, || {
            let existing = self.store.get(&validated.key)?.map(|s| s.id);
            match self
                .guard
                .admit(self.store.as_ref(), fingerprint, existing, now, &ctx)?
            {
                Admission::Deny(reason) => return Ok(SubmitOutcome::RateLimited { reason }),
                Admission::Allow => {}
            }

            let committed = self.aggregator.apply(
                self.store.as_ref(),
                &validated.key,
                &validated.args,
                &validated.report,
                &ctx,
            )?;
            Ok(SubmitOutcome::Accepted {
                strategy_id: committed.strategy.id,
                status: committed.strategy.status,
                report_id: committed.report_id,
                created: committed.previous_status.is_none(),
            })
        });

        match &result {
            Ok(SubmitOutcome::Accepted {
                strategy_id,
                status,
                report_id,
                ..
            }) => log_info!(
                ctx,
                "REPORT_ACCEPTED",
                strategy_id = strategy_id,
                report_id = report_id,
                status = status,
                success = validated.report.success
            ),
            Ok(SubmitOutcome::RateLimited { reason }) => {
                log_warn!(ctx, "REPORT_RATE_LIMITED", reason = reason.as_str())
            }
            Err(err) => log_warn!(
                ctx,
                "REPORT_FAILED",
                kind = err.kind().as_str(),
                retryable = err.is_retryable(),
                error = err
            ),
        }
        result
    }

    /// Submit several reports in order. One failure does not stop the rest.
    pub fn submit_batch(&self, submissions: &[ReportSubmission], now: DateTime<Utc>) -> BatchResult {
        let batch = RequestContext::batch(now);
        let mut result = BatchResult {
            received_count: submissions.len(),
            accepted_count: 0,
            rate_limited_count: 0,
            rejected_count: 0,
            failed_count: 0,
            results: Vec::with_capacity(submissions.len()),
        };

        for (index, submission) in submissions.iter().enumerate() {
            let outcome = self.submit_with_context(submission, now, &batch.item(index));
            match &outcome {
                Ok(SubmitOutcome::Accepted { .. }) => result.accepted_count += 1,
                Ok(SubmitOutcome::RateLimited { .. }) => result.rate_limited_count += 1,
                Err(err) if err.kind() == ErrorKind::InvalidReport => result.rejected_count += 1,
                Err(_) => result.failed_count += 1,
            }
            result.results.push(outcome);
        }

        log_info!(
            batch.log_context(),
            "BATCH_COMPLETE",
            received = result.received_count,
            accepted = result.accepted_count,
            rate_limited = result.rate_limited_count,
            rejected = result.rejected_count,
            failed = result.failed_count
        );
        result
    }

    /// Best servable strategies for exactly this (provider, service).
    pub fn best_strategies(
        &self,
        provider_id: &str,
        service_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<RankedStrategy>> {
        self.ranker
            .best_strategies(self.store.as_ref(), provider_id, service_id, limit, now)
    }

    /// Up to `ranking.max_results` strategies, falling back to strong
    /// strategies from other providers when this provider has few.
    pub fn recommend(
        &self,
        provider_id: &str,
        service_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<RankedStrategy>> {
        let ctx = RequestContext::new(now).log_context();
        let ranked = self
            .ranker
            .recommend(self.store.as_ref(), provider_id, service_id, now)?;
        log::debug!(
            "{} RECOMMEND provider={} service={} results={} fallback={}",
            ctx,
            provider_id,
            service_id,
            ranked.len(),
            ranked
                .iter()
                .filter(|r| r.source == RankSource::Fallback)
                .count()
        );
        Ok(ranked)
    }

    /// Catalog lookup; `None` for an unknown service.
    pub fn get_service(&self, service_id: &str) -> EngineResult<Option<ServiceCatalogEntry>> {
        self.catalog.get_service(service_id)
    }

    /// Every catalog service with the provider's servable strategy count,
    /// most covered first.
    pub fn services_overview(&self, provider_id: &str) -> EngineResult<Vec<ServiceOverview>> {
        let counts = self.store.servable_counts_by_service(provider_id)?;
        let mut overview: Vec<ServiceOverview> = self
            .catalog
            .list_services()?
            .into_iter()
            .map(|service| ServiceOverview {
                strategy_count: counts.get(&service.id).copied().unwrap_or(0),
                service,
            })
            .collect();
        overview.sort_by(|a, b| {
            b.strategy_count
                .cmp(&a.strategy_count)
                .then_with(|| a.service.display_name.cmp(&b.service.display_name))
        });
        Ok(overview)
    }

    pub fn health(&self) -> EngineResult<HealthReport> {
        Ok(HealthReport {
            strategies: self.store.status_counts()?,
            catalog_services: self.catalog.list_services()?.len(),
        })
    }

    /// Ledger entries for one strategy, for abuse investigation.
    pub fn reports_for_strategy(&self, strategy_id: StrategyId) -> EngineResult<Vec<Report>> {
        if self.store.get_by_id(strategy_id)?.is_none() {
            return Err(EngineError::NotFound {
                what: "strategy",
                id: strategy_id.to_string(),
            });
        }
        self.store.by_strategy(strategy_id)
    }
}
