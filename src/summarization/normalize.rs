//! Whitespace normalization and length capping applied before summarization.

/// Largest input, in characters, forwarded to the summarization endpoint.
pub const MAX_SUMMARY_INPUT_CHARS: usize = 3500;

/// Text prepared for the summarizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedText {
    /// Normalized text, capped at the character limit.
    pub text: String,
    /// Whether the normalized text had to be cut to fit the limit.
    pub truncated: bool,
}

/// Replace line breaks and tabs with spaces and collapse whitespace runs to one space.
pub fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max_chars` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

/// Normalize and cap `raw` for a summarization request.
pub fn prepare_input(raw: &str, max_chars: usize) -> PreparedText {
    let mut text = normalize_whitespace(raw);
    let (capped_len, truncated) = {
        let (capped, truncated) = truncate_chars(&text, max_chars);
        (capped.len(), truncated)
    };
    text.truncate(capped_len);
    PreparedText { text, truncated }
}
