//! Engine configuration.
//!
//! Every threshold the engine uses lives here. Defaults mirror the values the
//! crowdsourcing server shipped with; all of them are tunable through JSON or
//! environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Longest window or age any duration setting may name (100 years).
pub const MAX_DURATION_SECS: u64 = 100 * 365 * SECS_PER_DAY;

/// `secs` as a signed time delta, clamped to `MAX_DURATION_SECS`.
pub fn seconds_delta(secs: u64) -> chrono::Duration {
    let max = chrono::Duration::days((MAX_DURATION_SECS / SECS_PER_DAY) as i64);
    i64::try_from(secs.min(MAX_DURATION_SECS))
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(max)
}

/// Sliding-window admission limits (per fingerprint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Reports accepted per fingerprint within `window_secs`, across all strategies.
    pub max_reports_per_window: usize,
    pub window_secs: u64,
    /// Distinct strategies one fingerprint may report on within `window_secs`.
    pub max_distinct_strategies_per_window: usize,
    /// Reports per fingerprint for one strategy within `strategy_window_secs`.
    pub max_reports_per_strategy_window: usize,
    pub strategy_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_reports_per_window: 10,
            window_secs: 3600,
            max_distinct_strategies_per_window: 5,
            max_reports_per_strategy_window: 1,
            strategy_window_secs: 300,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> chrono::Duration {
        seconds_delta(self.window_secs)
    }

    pub fn strategy_window(&self) -> chrono::Duration {
        seconds_delta(self.strategy_window_secs)
    }

    /// Longest look-back any admission check needs.
    pub fn lookback(&self) -> chrono::Duration {
        seconds_delta(self.window_secs.max(self.strategy_window_secs))
    }
}

/// Status state machine thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusThresholds {
    /// K_min: successes needed before a strategy can be confirmed.
    pub min_votes: u64,
    /// R_confirm: success ratio needed for confirmation or recovery.
    pub confirm_ratio: f64,
    /// R_deprecate: recent success ratio below which a strategy is deprecated.
    pub deprecate_ratio: f64,
    /// T_stale: age of the last success after which a strategy is deprecated.
    pub stale_after_secs: u64,
    /// Half-life of the decayed recent success/fail tallies.
    pub recent_half_life_secs: u64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            min_votes: 5,
            confirm_ratio: 0.60,
            deprecate_ratio: 0.40,
            stale_after_secs: 7 * SECS_PER_DAY,
            recent_half_life_secs: 3 * SECS_PER_DAY,
        }
    }
}

impl StatusThresholds {
    pub fn stale_after(&self) -> chrono::Duration {
        seconds_delta(self.stale_after_secs)
    }
}

/// Read-path limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub max_results: usize,
    /// Below this many provider-specific results, other providers are consulted.
    pub min_provider_results: usize,
    pub fallback_min_ratio: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            min_provider_results: 3,
            fallback_min_ratio: 0.70,
        }
    }
}

/// Boundary validation limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportLimits {
    pub max_latency_ms: f64,
    pub max_args_bytes: usize,
    pub max_args_depth: usize,
    pub min_fingerprint_len: usize,
    pub max_fingerprint_len: usize,
    pub max_provider_id_len: usize,
    pub max_service_id_len: usize,
    pub max_client_version_len: usize,
}

impl Default for ReportLimits {
    fn default() -> Self {
        Self {
            max_latency_ms: 120_000.0,
            max_args_bytes: 16 * 1024,
            max_args_depth: 8,
            min_fingerprint_len: 16,
            max_fingerprint_len: 128,
            max_provider_id_len: 50,
            max_service_id_len: 100,
            max_client_version_len: 64,
        }
    }
}

/// Store access bounds and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub lock_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub read_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2000,
            retry_attempts: 3,
            retry_backoff_ms: 25,
            max_backoff_ms: 500,
            read_pool_size: 4,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based), doubling and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rate_limit: RateLimitConfig,
    pub status: StatusThresholds,
    pub ranking: RankingConfig,
    pub limits: ReportLimits,
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Parse a JSON document; missing sections and fields take defaults.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the environment variables the server recognises.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();

        if let Some(v) = parse_var(&lookup, "MAX_REPORTS_PER_HOUR")? {
            config.rate_limit.max_reports_per_window = v;
            config.rate_limit.window_secs = 3600;
        }
        if let Some(v) = parse_var(&lookup, "MIN_VOTES_VERIFIED")? {
            config.status.min_votes = v;
        }
        if let Some(v) = parse_var(&lookup, "VERIFIED_RATE_THRESHOLD")? {
            config.status.confirm_ratio = v;
        }
        if let Some(v) = parse_var(&lookup, "STALE_RATE_THRESHOLD")? {
            config.status.deprecate_ratio = v;
        }
        if let Some(days) = parse_var::<u64, _>(&lookup, "STALE_DAYS")? {
            config.status.stale_after_secs = days.checked_mul(SECS_PER_DAY).ok_or_else(|| {
                EngineError::Config(format!("STALE_DAYS={} is out of range", days))
            })?;
        }
        if let Some(v) = parse_var(&lookup, "MAX_STRATEGIES_RESPONSE")? {
            config.ranking.max_results = v;
        }
        if let Some(v) = parse_var(&lookup, "MIN_PROVIDER_STRATEGIES")? {
            config.ranking.min_provider_results = v;
        }
        if let Some(v) = parse_var(&lookup, "FALLBACK_SUCCESS_RATE")? {
            config.ranking.fallback_min_ratio = v;
        }
        if let Some(v) = parse_var(&lookup, "STORE_LOCK_TIMEOUT_MS")? {
            config.store.lock_timeout_ms = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the state machine or limiter cannot work with.
    pub fn validate(&self) -> EngineResult<()> {
        let ratios = [
            ("status.confirm_ratio", self.status.confirm_ratio),
            ("status.deprecate_ratio", self.status.deprecate_ratio),
            ("ranking.fallback_min_ratio", self.ranking.fallback_min_ratio),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.status.deprecate_ratio > self.status.confirm_ratio {
            return Err(EngineError::Config(format!(
                "status.deprecate_ratio ({}) exceeds status.confirm_ratio ({})",
                self.status.deprecate_ratio, self.status.confirm_ratio
            )));
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.strategy_window_secs == 0 {
            return Err(EngineError::Config(
                "rate limit windows must be non-zero".to_string(),
            ));
        }
        if self.status.stale_after_secs == 0 || self.status.recent_half_life_secs == 0 {
            return Err(EngineError::Config(
                "status durations must be non-zero".to_string(),
            ));
        }
        let durations = [
            ("rate_limit.window_secs", self.rate_limit.window_secs),
            ("rate_limit.strategy_window_secs", self.rate_limit.strategy_window_secs),
            ("status.stale_after_secs", self.status.stale_after_secs),
            ("status.recent_half_life_secs", self.status.recent_half_life_secs),
            ("store.lock_timeout_ms", self.store.lock_timeout_ms / 1000),
            ("store.max_backoff_ms", self.store.max_backoff_ms / 1000),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(EngineError::Config(format!(
                    "{} exceeds the {}s limit",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if self.store.retry_attempts == 0 {
            return Err(EngineError::Config(
                "store.retry_attempts must be at least 1".to_string(),
            ));
        }
        if !self.limits.max_latency_ms.is_finite() || self.limits.max_latency_ms <= 0.0 {
            return Err(EngineError::Config(
                "limits.max_latency_ms must be a positive number".to_string(),
            ));
        }
        if self.limits.min_fingerprint_len > self.limits.max_fingerprint_len {
            return Err(EngineError::Config(
                "limits.min_fingerprint_len exceeds limits.max_fingerprint_len".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> EngineResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}
