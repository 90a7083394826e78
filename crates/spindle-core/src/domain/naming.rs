//! Filesystem-safe names for output files.

/// Keep ASCII/Unicode alphanumerics, space, `-` and `_`; drop everything
/// else, trim, and cap at `max_chars` characters.
pub fn sanitize(raw: &str, max_chars: usize) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(max_chars)
        .collect();
    kept.trim().to_string()
}

/// Descriptive stem for an output: sanitized title, falling back to the
/// sanitized media id, then to `"media"`.
pub fn display_stem(title: &str, media_id: &str, max_chars: usize) -> String {
    [title, media_id]
        .iter()
        .map(|s| sanitize(s, max_chars))
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| "media".to_string())
}
