//! Content hashes for strategy payloads and fingerprint tags.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of the fingerprint tag written to logs.
pub const FINGERPRINT_TAG_LEN: usize = 12;

/// Compute SHA256 hash of content (lowercase hex).
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical text of a strategy payload.
///
/// A list of string arguments is trimmed, lower-cased, stripped of empty
/// entries, sorted and joined with `|`, so argument order and case do not
/// produce distinct strategies. Any other shape is rendered as JSON with
/// object keys sorted.
pub fn normalize_args(args: &Value) -> String {
    if let Some(list) = string_list(args) {
        let mut normalized: Vec<String> = list
            .iter()
            .map(|arg| arg.trim().to_lowercase())
            .filter(|arg| !arg.is_empty())
            .collect();
        normalized.sort();
        return normalized.join("|");
    }
    let mut out = String::new();
    write_canonical(args, &mut out);
    out
}

/// Deterministic hash of a strategy payload.
pub fn compute_strategy_hash(args: &Value) -> String {
    compute_hash(&normalize_args(args))
}

/// Short stable tag for a fingerprint, safe to log.
pub fn fingerprint_tag(fingerprint: &str) -> String {
    let mut hash = compute_hash(fingerprint);
    hash.truncate(FINGERPRINT_TAG_LEN);
    hash
}

fn string_list(args: &Value) -> Option<Vec<&str>> {
    args.as_array()?.iter().map(|v| v.as_str()).collect()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
