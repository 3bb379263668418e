use lazy_static::lazy_static;
use regex::Regex;

/// Longest filename kept after sanitizing (in characters)
pub const MAX_FILENAME_CHARS: usize = 255;

lazy_static! {
    /// Characters that must never reach an archive entry name or a header value:
    /// path separators, drive separators and control characters.
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[/\\:\x00-\x1f\x7f]").unwrap();

    /// Characters that are unsafe in the quoted ASCII `filename=` fallback
    static ref NON_HEADER_SAFE_CHARS: Regex = Regex::new(r#"[^\x20-\x7e]|["\\]"#).unwrap();
}

/// Sanitize a user-supplied filename so it can be used as a single archive
/// entry name or download name.
///
/// - Separators and control characters are replaced with `_`
/// - Leading dots and surrounding whitespace are dropped (no `..`, no hidden files)
/// - Empty results fall back to `"unnamed"`
pub fn sanitize_filename(name: &str) -> String {
    let replaced = UNSAFE_FILENAME_CHARS.replace_all(name, "_");
    let trimmed = replaced.trim().trim_start_matches('.').trim();

    let truncated: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    if truncated.is_empty() {
        "unnamed".to_string()
    } else {
        truncated
    }
}

/// ASCII-only rendering of a filename for the legacy `filename="..."` parameter
pub fn ascii_filename_fallback(name: &str) -> String {
    NON_HEADER_SAFE_CHARS.replace_all(name, "_").into_owned()
}
