//! Helpers for keeping diagnostic strings within storage and transport limits.

/// Cuts `s` to at most `max` characters without adding a marker.
///
/// Used for values written into length-limited columns.
pub fn abbreviate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Cuts `s` to at most `max` characters, ending with `...` when shortened.
pub fn cut(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out = abbreviate(s, keep);
    out.push_str("...");
    out
}

/// Returns `-` for missing or blank values.
pub fn or_dash(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}
