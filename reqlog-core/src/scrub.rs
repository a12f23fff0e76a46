//! Redaction and filtering applied to captured request data.
//!
//! ```
//! use reqlog_core::scrub::{mask_authorization, trim_body, filter_control_chars};
//!
//! assert_eq!(mask_authorization("Bearer eyJhbGciOi..."), "Bearer ***");
//! assert_eq!(trim_body(b"abcdef", 3), "TRIMMED\nabc");
//! assert_eq!(filter_control_chars("a\u{0}b\nc"), "ab\nc");
//! ```

/// Mask used for credentials and redacted headers.
pub const MASK: &str = "***";

/// Marker prepended to a raw body that exceeded the configured limit.
pub const TRIMMED_MARKER: &str = "TRIMMED\n";

/// Header whose credential is masked while its scheme is kept.
pub const AUTHORIZATION: &str = "Authorization";

// ─────────────────────────────────────────────────────────────
// Header scrubbing
// ─────────────────────────────────────────────────────────────

/// Keep the auth scheme (first whitespace-delimited token), mask the rest:
/// `Bearer abc.def` → `Bearer ***`.
pub fn mask_authorization(value: &str) -> String {
    match value.split_whitespace().next() {
        Some(scheme) => format!("{scheme} {MASK}"),
        None => MASK.to_string(),
    }
}

/// Scrub one request header value for a full-header snapshot.
///
/// `Authorization` keeps its scheme; names in `extra` (case-insensitive) are
/// masked entirely. Returns `(value, was_scrubbed)`.
pub fn scrub_header(name: &str, value: &str, extra: &[String]) -> (String, bool) {
    if name.eq_ignore_ascii_case(AUTHORIZATION) {
        return (mask_authorization(value), true);
    }
    if extra.iter().any(|e| e.eq_ignore_ascii_case(name)) {
        return (MASK.to_string(), true);
    }
    (value.to_string(), false)
}

// ─────────────────────────────────────────────────────────────
// Body filtering
// ─────────────────────────────────────────────────────────────

/// Cut a raw body to `limit` bytes, prefixed by [`TRIMMED_MARKER`], when it
/// is longer than `limit`. The cut backs off to a UTF-8 boundary so the result
/// never exceeds `limit + TRIMMED_MARKER.len()` bytes.
pub fn trim_body(raw: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    if raw.len() <= limit {
        return text.into_owned();
    }
    let mut cut = limit.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{TRIMMED_MARKER}{}", &text[..cut])
}

/// Remove control characters other than newline, carriage return and tab.
pub fn filter_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// [`trim_body`] followed by [`filter_control_chars`].
pub fn sanitize_body(raw: &[u8], limit: usize) -> String {
    filter_control_chars(&trim_body(raw, limit))
}
