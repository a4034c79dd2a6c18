//! Text sanitizer for extracted page/chapter text.
//!
//! PDF and EPUB extraction routinely leaves ligatures, private-use glyphs
//! and other non-ASCII artifacts in the text. Everything from U+0080 up is
//! replaced with a single space before the text is chunked or embedded.

/// Placeholder text for a unit that is empty after sanitizing.
pub const EMPTY_UNIT_PLACEHOLDER: &str = "Empty chapter/page";

/// Replace every character at or above U+0080 with a single space.
///
/// Idempotent, and the output never has more characters than the input.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { ' ' })
        .collect()
}

/// [`sanitize`], then substitute [`EMPTY_UNIT_PLACEHOLDER`] for empty or
/// whitespace-only results so the chunker never sees an empty string.
pub fn sanitize_unit_text(text: &str) -> String {
    let cleaned = sanitize(text);
    if cleaned.trim().is_empty() {
        EMPTY_UNIT_PLACEHOLDER.to_string()
    } else {
        cleaned
    }
}
