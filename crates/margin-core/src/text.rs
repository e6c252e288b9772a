//! UTF-8 safe string truncation.
//!
//! `&str[..n]` panics when `n` falls inside a multi-byte character. These
//! helpers snap back to the nearest char boundary.

/// Truncate a string to at most `max_bytes` bytes at a char boundary.
#[inline]
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate `s` and append `suffix` if the original exceeds `max_bytes`.
///
/// The result is at most `max_bytes` bytes long, suffix included.
pub fn truncate_with_suffix(s: &str, max_bytes: usize, suffix: &str) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let body_budget = max_bytes.saturating_sub(suffix.len());
    let prefix = truncate_str(s, body_budget);
    format!("{prefix}{suffix}")
}

/// One-line preview of a prompt or tool output for log fields.
pub fn preview(s: &str, max_bytes: usize) -> String {
    let first_line = s.lines().next().unwrap_or_default();
    let clipped = truncate_with_suffix(first_line, max_bytes, "...");
    if clipped.len() < s.len() && !clipped.ends_with("...") {
        format!("{clipped}...")
    } else {
        clipped
    }
}
