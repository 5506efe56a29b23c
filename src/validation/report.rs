//! Boundary validation of submitted reports.
//!
//! Turns an untrusted `ReportSubmission` into a `ValidatedReport` carrying the
//! resolved strategy key and a ledger-ready `NewReport`. Nothing downstream
//! re-checks these fields.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ReportLimits;
use crate::error::{EngineResult, InvalidReport};
use crate::logging::structured::LogContext;
use crate::security::{
    check_args, compute_strategy_hash, detect_pii, fingerprint_tag, sanitize_client_version,
};
use crate::storage::{NewReport, ServiceCatalog, StrategyKey};

lazy_static! {
    /// Provider and service identifiers
    static ref IDENTIFIER_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*$").unwrap();
}

/// A report as received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSubmission {
    pub provider_id: String,
    pub service_id: String,
    /// Strategy payload, usually a list of command-line arguments.
    #[serde(alias = "zapret_args")]
    pub args: Value,
    /// Hash the client computed for `args`, if it sent one.
    #[serde(default)]
    pub claimed_hash: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub latency_ms: f64,
    pub fingerprint: String,
    #[serde(default)]
    pub client_version: String,
}

fn default_success() -> bool {
    true
}

/// A submission that passed every boundary check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReport {
    pub key: StrategyKey,
    pub args: Value,
    pub report: NewReport,
    pub fingerprint_tag: String,
}

/// Whether `value` is usable as a provider or service id.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_PATTERN.is_match(value)
}

/// Validate a submission received at `now`.
///
/// The service must exist in `catalog`; providers have no catalog and are
/// checked syntactically only.
pub fn validate_submission(
    submission: &ReportSubmission,
    catalog: &dyn ServiceCatalog,
    limits: &ReportLimits,
    now: DateTime<Utc>,
    ctx: &LogContext,
) -> EngineResult<ValidatedReport> {
    let provider_id = check_identifier(
        "provider_id",
        &submission.provider_id,
        limits.max_provider_id_len,
    )?;
    let service_id = check_identifier(
        "service_id",
        &submission.service_id,
        limits.max_service_id_len,
    )?;
    check_fingerprint(&submission.fingerprint, limits)?;
    check_latency(submission.latency_ms, limits)?;

    let tag = fingerprint_tag(&submission.fingerprint);
    let ctx = ctx.with_fingerprint_tag(&tag);
    check_args(&submission.args, limits, &ctx)?;

    let strategy_hash = compute_strategy_hash(&submission.args);
    if let Some(claimed) = &submission.claimed_hash {
        if !claimed.trim().eq_ignore_ascii_case(&strategy_hash) {
            return Err(InvalidReport::HashMismatch {
                claimed: claimed.clone(),
                computed: strategy_hash,
            }
            .into());
        }
    }

    if catalog.get_service(service_id)?.is_none() {
        return Err(InvalidReport::UnknownService {
            service_id: service_id.to_string(),
        }
        .into());
    }

    let client_version =
        sanitize_client_version(&submission.client_version, limits.max_client_version_len, &ctx);

    log::debug!(
        "{} REPORT_VALID service={} success={} latency_ms={}",
        ctx,
        service_id,
        submission.success,
        submission.latency_ms
    );

    Ok(ValidatedReport {
        key: StrategyKey::new(provider_id, service_id, &strategy_hash),
        args: submission.args.clone(),
        report: NewReport {
            fingerprint: submission.fingerprint.clone(),
            reported_at: now,
            success: submission.success,
            latency_ms: submission.latency_ms,
            client_version,
        },
        fingerprint_tag: tag,
    })
}

fn check_identifier<'a>(
    field: &'static str,
    raw: &'a str,
    max: usize,
) -> Result<&'a str, InvalidReport> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(InvalidReport::EmptyField { field });
    }
    let len = value.chars().count();
    if len > max {
        return Err(InvalidReport::FieldLength {
            field,
            len,
            min: 1,
            max,
        });
    }
    if !is_valid_identifier(value) {
        return Err(InvalidReport::FieldCharset { field });
    }
    Ok(value)
}

fn check_fingerprint(fingerprint: &str, limits: &ReportLimits) -> Result<(), InvalidReport> {
    if fingerprint.is_empty() {
        return Err(InvalidReport::EmptyField {
            field: "fingerprint",
        });
    }
    let len = fingerprint.chars().count();
    if len < limits.min_fingerprint_len || len > limits.max_fingerprint_len {
        return Err(InvalidReport::FieldLength {
            field: "fingerprint",
            len,
            min: limits.min_fingerprint_len,
            max: limits.max_fingerprint_len,
        });
    }
    if !fingerprint.chars().all(|c| c.is_ascii_graphic()) {
        return Err(InvalidReport::FieldCharset {
            field: "fingerprint",
        });
    }
    if let Some(kind) = detect_pii(fingerprint) {
        return Err(InvalidReport::FingerprintLooksLikePii {
            kind: kind.as_str(),
        });
    }
    Ok(())
}

fn check_latency(latency_ms: f64, limits: &ReportLimits) -> Result<(), InvalidReport> {
    if !latency_ms.is_finite() || latency_ms < 0.0 || latency_ms > limits.max_latency_ms {
        return Err(InvalidReport::LatencyOutOfRange {
            latency_ms,
            max_ms: limits.max_latency_ms,
        });
    }
    Ok(())
}
