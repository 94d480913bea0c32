//! Content and timestamp normalization
//!
//! Normalized content is only ever used for equality checks; the stored value
//! is always what the client sent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// Epoch values above this magnitude are treated as milliseconds
pub const MILLIS_THRESHOLD: i64 = 10_000_000_000;

lazy_static! {
    static ref BLOCK_TAG_RE: Regex =
        Regex::new(r"(?i)</?(?:p|div|br|li|ul|ol|h[1-6]|blockquote|tr|td|th|table|hr|pre)\b[^>]*>").unwrap();
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref WS_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Strip markup, decode common entities, collapse whitespace and trim.
///
/// Block-level tags separate words; inline tags vanish, so `<b>Idea</b>s`
/// and `Ideas` compare equal.
pub fn normalize_content(raw: &str) -> String {
    let blocks = BLOCK_TAG_RE.replace_all(raw, " ");
    let stripped = TAG_RE.replace_all(&blocks, "");
    let decoded = decode_entities(&stripped);
    WS_RE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    // &amp; last so "&amp;lt;" decodes to "&lt;" rather than "<"
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

/// True when two pieces of rich text are the same idea once markup is ignored
pub fn same_content(a: &str, b: &str) -> bool {
    normalize_content(a) == normalize_content(b)
}

/// Convert a raw epoch number to seconds, detecting milliseconds by magnitude
pub fn epoch_seconds(raw: i64) -> i64 {
    if raw.unsigned_abs() > MILLIS_THRESHOLD.unsigned_abs() {
        raw / 1000
    } else {
        raw
    }
}

/// Parse a wire timestamp: epoch seconds, epoch milliseconds, numeric string,
/// RFC 3339 / ISO-8601, `YYYY-MM-DD HH:MM:SS` or a bare date (read as UTC).
/// Values chrono cannot represent are rejected.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .map(epoch_seconds),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    };
    parsed.filter(|secs| DateTime::<Utc>::from_timestamp(*secs, 0).is_some())
}

fn parse_timestamp_str(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(epoch_seconds(n));
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            return Some(epoch_seconds(f as i64));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp())
}

/// Normalize a timestamp, falling back to `now` when absent or unparseable
pub fn timestamp_or(value: Option<&Value>, now: i64) -> i64 {
    match value {
        None | Some(Value::Null) => now,
        Some(v) => match parse_timestamp(v) {
            Some(ts) => ts,
            None => {
                tracing::warn!("unparseable timestamp {}, using current time", v);
                now
            }
        },
    }
}

/// Truncate to at most `max` characters, respecting char boundaries
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Current time as epoch seconds
pub fn now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_normalize_strips_markup() {
        assert_eq!(normalize_content("<b>Idea A</b>"), "Idea A");
        assert_eq!(normalize_content("<p>Two\n\n  words</p>"), "Two words");
        assert_eq!(normalize_content("  Idea&nbsp;A  "), "Idea A");
        assert_eq!(normalize_content("Fish &amp; chips"), "Fish & chips");
        assert_eq!(normalize_content("<p></p>"), "");
    }

    #[test]
    fn test_inline_markup_inside_word() {
        assert_eq!(normalize_content("<b>Idea</b>s"), "Ideas");
        assert!(same_content("<b>Idea</b>s", "Ideas"));
        assert!(same_content("re<i>cycle</i> <span class=\"x\">more</span>", "recycle more"));
        assert_eq!(normalize_content("<p>One</p><p>Two</p>"), "One Two");
        assert_eq!(normalize_content("Line<br>break<BR/>here"), "Line break here");
        assert_eq!(normalize_content("<li>a</li><li>b</li>"), "a b");
    }

    #[test]
    fn test_same_content_ignores_markup() {
        assert!(same_content("<b>Idea A</b>", "Idea A"));
        assert!(same_content("<p>Idea   A</p>", " Idea A "));
        assert!(!same_content("Idea A", "Idea B"));
    }

    #[test]
    fn test_epoch_seconds_detects_millis() {
        assert_eq!(epoch_seconds(1_700_000_000), 1_700_000_000);
        assert_eq!(epoch_seconds(1_700_000_000_123), 1_700_000_000);
        assert_eq!(epoch_seconds(MILLIS_THRESHOLD), MILLIS_THRESHOLD);
        assert_eq!(epoch_seconds(-1_700_000_000_000), -1_700_000_000);
    }

    #[test]
    fn test_extreme_timestamps_fall_back() {
        assert_eq!(epoch_seconds(i64::MIN), i64::MIN / 1000);
        assert_eq!(epoch_seconds(i64::MAX), i64::MAX / 1000);
        assert_eq!(parse_timestamp(&json!(i64::MIN)), None);
        assert_eq!(parse_timestamp(&json!(i64::MAX)), None);
        assert_eq!(parse_timestamp(&json!(-1e19)), None);
        assert_eq!(parse_timestamp(&json!("-9223372036854775808")), None);
        assert_eq!(timestamp_or(Some(&json!(i64::MIN)), 42), 42);
        assert_eq!(timestamp_or(Some(&json!(1e300)), 42), 42);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!(1_700_000_000_500i64)), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!(1_700_000_000.9)), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14T22:13:20Z")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14T23:13:20+01:00")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14 22:13:20")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14T22:13:20.250")), Some(1_700_000_000));
        assert_eq!(parse_timestamp(&json!("2023-11-14")), Some(1_699_920_000));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn test_timestamp_or_falls_back() {
        assert_eq!(timestamp_or(None, 42), 42);
        assert_eq!(timestamp_or(Some(&Value::Null), 42), 42);
        assert_eq!(timestamp_or(Some(&json!("garbage")), 42), 42);
        assert_eq!(timestamp_or(Some(&json!(1_700_000_000)), 42), 1_700_000_000);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("", 0), "");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(s in "[a-zA-Z0-9 <>/\t\n]{0,200}") {
            let once = normalize_content(&s);
            prop_assert_eq!(normalize_content(&once), once.clone());
        }

        #[test]
        fn prop_normalized_has_no_double_spaces(s in "[a-z <>/b]{0,80}") {
            let n = normalize_content(&s);
            prop_assert!(!n.contains("  "));
            prop_assert_eq!(n.trim(), n.as_str());
        }

        #[test]
        fn prop_millis_and_seconds_agree(secs in 10_000_001i64..4_000_000_000) {
            prop_assert_eq!(epoch_seconds(secs * 1000 + 999), secs);
            prop_assert_eq!(epoch_seconds(secs), secs);
        }
    }
}
