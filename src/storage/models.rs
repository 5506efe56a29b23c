//! Data model for strategies, reports and the service catalog.
//!
//! These models mirror the rows of the `strategies`, `reports` and
//! `services_catalog` tables.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row id of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(pub i64);

impl StrategyId {
    /// Placeholder carried by a record that the store has not inserted yet.
    pub const UNASSIGNED: StrategyId = StrategyId(0);

    pub fn is_assigned(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row id of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportId(pub i64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Confirmation status of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Unconfirmed,
    Confirmed,
    Deprecated,
}

impl StrategyStatus {
    pub const ALL: [StrategyStatus; 3] = [
        StrategyStatus::Confirmed,
        StrategyStatus::Unconfirmed,
        StrategyStatus::Deprecated,
    ];

    /// Statuses the read path may return.
    pub const SERVABLE: [StrategyStatus; 2] =
        [StrategyStatus::Confirmed, StrategyStatus::Unconfirmed];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Unconfirmed => "unconfirmed",
            StrategyStatus::Confirmed => "confirmed",
            StrategyStatus::Deprecated => "deprecated",
        }
    }

    pub fn is_servable(&self) -> bool {
        !matches!(self, StrategyStatus::Deprecated)
    }

    /// Ranking precedence: lower sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            StrategyStatus::Confirmed => 0,
            StrategyStatus::Unconfirmed => 1,
            StrategyStatus::Deprecated => 2,
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unconfirmed" => Ok(StrategyStatus::Unconfirmed),
            "confirmed" => Ok(StrategyStatus::Confirmed),
            "deprecated" => Ok(StrategyStatus::Deprecated),
            other => Err(format!("unknown strategy status `{}`", other)),
        }
    }
}

/// Unique key of a strategy: one args payload for one (provider, service).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyKey {
    pub provider_id: String,
    pub service_id: String,
    pub strategy_hash: String,
}

impl StrategyKey {
    pub fn new(provider_id: &str, service_id: &str, strategy_hash: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            service_id: service_id.to_string(),
            strategy_hash: strategy_hash.to_string(),
        }
    }

    /// Compact form for log lines: the hash is cut to 8 chars.
    pub fn short(&self) -> String {
        let hash = self
            .strategy_hash
            .get(..8)
            .unwrap_or(self.strategy_hash.as_str());
        format!("{}/{}/{}", self.provider_id, self.service_id, hash)
    }

    pub fn service(&self) -> ServiceKey {
        ServiceKey {
            provider_id: self.provider_id.clone(),
            service_id: self.service_id.clone(),
        }
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.provider_id, self.service_id, self.strategy_hash
        )
    }
}

/// (provider, service) pair the read path is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub provider_id: String,
    pub service_id: String,
}

/// Aggregated reputation of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub key: StrategyKey,
    /// Opaque payload; hashed and stored, never interpreted.
    pub args: Value,
    pub success_count: u64,
    pub fail_count: u64,
    /// Running mean over every applied report.
    pub avg_latency_ms: f64,
    /// Exponentially decayed tallies, valid as of `recent_as_of`.
    pub recent_success: f64,
    pub recent_fail: f64,
    pub recent_as_of: DateTime<Utc>,
    pub last_confirmed: Option<DateTime<Utc>>,
    pub first_reported: DateTime<Utc>,
    pub status: StrategyStatus,
}

impl Strategy {
    pub fn total_reports(&self) -> u64 {
        self.success_count + self.fail_count
    }

    /// Plain success ratio; 0 for a record with no evidence.
    pub fn success_ratio(&self) -> f64 {
        let total = self.total_reports();
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Laplace-smoothed ranking score: `s / (s + f + 1)`.
    pub fn score(&self) -> f64 {
        self.success_count as f64 / (self.total_reports() as f64 + 1.0)
    }

    /// Time of the last success, or creation time if there never was one.
    pub fn last_evidence_at(&self) -> DateTime<Utc> {
        self.last_confirmed.unwrap_or(self.first_reported)
    }
}

/// A report about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub fingerprint: String,
    pub reported_at: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: f64,
    pub client_version: String,
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub strategy_id: Option<StrategyId>,
    pub fingerprint: String,
    pub reported_at: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: f64,
    pub client_version: String,
}

impl Report {
    pub fn from_new(id: ReportId, strategy_id: Option<StrategyId>, new: &NewReport) -> Self {
        Self {
            id,
            strategy_id,
            fingerprint: new.fingerprint.clone(),
            reported_at: new.reported_at,
            success: new.success,
            latency_ms: new.latency_ms,
            client_version: new.client_version.clone(),
        }
    }
}

/// A protected service and its hostnames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCatalogEntry {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub main_domain: String,
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[serde(default)]
    pub icon_emoji: String,
}

/// Strategy counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: u64,
    pub unconfirmed: u64,
    pub confirmed: u64,
    pub deprecated: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: StrategyStatus) {
        self.total += 1;
        match status {
            StrategyStatus::Unconfirmed => self.unconfirmed += 1,
            StrategyStatus::Confirmed => self.confirmed += 1,
            StrategyStatus::Deprecated => self.deprecated += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn strategy(success: u64, fail: u64) -> Strategy {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Strategy {
            id: StrategyId(1),
            key: StrategyKey::new("mts", "youtube", "abcdef0123456789"),
            args: serde_json::json!(["--dpi-desync=fake"]),
            success_count: success,
            fail_count: fail,
            avg_latency_ms: 0.0,
            recent_success: 0.0,
            recent_fail: 0.0,
            recent_as_of: t,
            last_confirmed: None,
            first_reported: t,
            status: StrategyStatus::Unconfirmed,
        }
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in StrategyStatus::ALL {
            assert_eq!(status.as_str().parse::<StrategyStatus>(), Ok(status));
        }
        assert!("verified".parse::<StrategyStatus>().is_err());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&StrategyStatus::Confirmed).unwrap();
        assert_eq!(json, r#""confirmed""#);
    }

    #[test]
    fn test_score_is_laplace_smoothed() {
        assert_eq!(strategy(0, 0).score(), 0.0);
        assert_eq!(strategy(0, 0).success_ratio(), 0.0);
        assert!((strategy(9, 0).score() - 0.9).abs() < 1e-12);
        assert!((strategy(8, 2).success_ratio() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_key_short_form() {
        let key = StrategyKey::new("mts", "youtube", "abcdef0123456789");
        assert_eq!(key.short(), "mts/youtube/abcdef01");
        let key = StrategyKey::new("mts", "youtube", "abc");
        assert_eq!(key.short(), "mts/youtube/abc");
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(StrategyStatus::Confirmed);
        counts.add(StrategyStatus::Deprecated);
        counts.add(StrategyStatus::Confirmed);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.confirmed, 2);
        assert_eq!(counts.deprecated, 1);
    }
}
