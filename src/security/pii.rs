//! PII screening.
//!
//! Fingerprints must be opaque client tokens. A fingerprint that *is* an
//! email address, an IP address or a phone number is rejected, and free-form
//! fields have such values replaced before they are stored.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Email pattern
    static ref EMAIL_PATTERN: Regex = Regex::new(
        r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}"
    ).unwrap();

    /// Whole-value IPv4, optionally with a port
    static ref IPV4_EXACT: Regex = Regex::new(
        r"^(?:\d{1,3}\.){3}\d{1,3}(?::\d{1,5})?$"
    ).unwrap();

    /// IPv4 anywhere in a string
    static ref IPV4_PATTERN: Regex = Regex::new(
        r"\b(?:\d{1,3}\.){3}\d{1,3}\b"
    ).unwrap();

    /// Whole-value phone number, e.g. +7 (999) 123-45-67
    static ref PHONE_EXACT: Regex = Regex::new(
        r"^\+?\d{1,3}?[\s.-]?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{2}[\s.-]?\d{2}$"
    ).unwrap();
}

/// Kind of personal data recognised in a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    Email,
    Ipv4,
    Phone,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Email => "email",
            PiiKind::Ipv4 => "ipv4",
            PiiKind::Phone => "phone",
        }
    }
}

/// Classify a token that is supposed to be opaque.
pub fn detect_pii(value: &str) -> Option<PiiKind> {
    let trimmed = value.trim();
    if EMAIL_PATTERN.is_match(trimmed) {
        Some(PiiKind::Email)
    } else if IPV4_EXACT.is_match(trimmed) {
        Some(PiiKind::Ipv4)
    } else if PHONE_EXACT.is_match(trimmed) {
        Some(PiiKind::Phone)
    } else {
        None
    }
}

/// Replace emails and IPv4 addresses embedded in free text.
///
/// Returns the scrubbed text and how many entities were replaced.
pub fn scrub_text(text: &str) -> (String, usize) {
    let emails = EMAIL_PATTERN.find_iter(text).count();
    let scrubbed = EMAIL_PATTERN.replace_all(text, "[EMAIL]");
    let ips = IPV4_PATTERN.find_iter(&scrubbed).count();
    let scrubbed = IPV4_PATTERN.replace_all(&scrubbed, "[IP]").into_owned();
    (scrubbed, emails + ips)
}
