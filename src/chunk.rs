//! Whitespace-boundary text chunker.
//!
//! Splits each [`ContentUnit`] into [`Chunk`]s of at most `max_chunk_chars`
//! characters (plus a fixed overrun), cutting just after the last whitespace
//! before the limit so words are not split. Every chunk copies its parent's
//! [`Location`](crate::models::Location) and gets a 1-based `part` index, so
//! a retrieved passage can always be cited back to its page or chapter.
//!
//! # Algorithm
//!
//! 1. `start = 0`, `part = 1`.
//! 2. Candidate `end = start + max_chunk_chars`.
//! 3. If `end` is inside the text, move it back to just after the last
//!    whitespace in `(start, end]`. With no whitespace there, cut raw.
//! 4. Emit `text[start .. end + CHUNK_OVERRUN_CHARS]` (clamped to the text).
//! 5. `start = end`, `part += 1`; repeat while `start < len`.
//!
//! Offsets are in characters, not bytes.
//!
//! # Example
//!
//! ```rust
//! use quote_ingest::chunk::chunk_unit;
//! use quote_ingest::models::{ContentUnit, Location};
//!
//! let unit = ContentUnit {
//!     text: "Call me Ishmael.".to_string(),
//!     location: Location::Page { page_number: 1 },
//! };
//! let chunks = chunk_unit(&unit, 3000);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].part, 1);
//! ```

use crate::models::{Chunk, ContentUnit};

/// Default chunk length in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 3000;

/// Extra characters taken past each cut point.
///
/// Slices overlap the next chunk by this much. Citation offsets use the
/// cut points (`Chunk::start..Chunk::end`), never the overrun.
pub const CHUNK_OVERRUN_CHARS: usize = 23;

/// Split a unit into chunks with the default overrun.
pub fn chunk_unit(unit: &ContentUnit, max_chunk_chars: usize) -> Vec<Chunk> {
    chunk_unit_with_overrun(unit, max_chunk_chars, CHUNK_OVERRUN_CHARS)
}

/// Split a unit into chunks, taking `overrun` extra characters per slice.
///
/// # Guarantees
///
/// - At least one chunk is returned, even for empty text.
/// - Parts are contiguous: `1, 2, …, N`.
/// - Cut points cover `[0, len)` with no gaps.
pub fn chunk_unit_with_overrun(
    unit: &ContentUnit,
    max_chunk_chars: usize,
    overrun: usize,
) -> Vec<Chunk> {
    let max_chars = max_chunk_chars.max(1);
    let text = unit.text.as_str();

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    // Byte offset of every char, plus one past the end.
    let byte_at: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    if len == 0 {
        return vec![make_chunk(unit, 1, "", 0, 0)];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut part = 1u32;

    while start < len {
        let mut end = start + max_chars;
        if end < len {
            end = chars[start + 1..=end]
                .iter()
                .rposition(|c| c.is_whitespace())
                .map(|pos| start + 1 + pos + 1)
                .unwrap_or(end);
        }
        let end = end.min(len);
        let slice_end = (end + overrun).min(len);
        let piece = &text[byte_at[start]..byte_at[slice_end]];

        chunks.push(make_chunk(unit, part, piece, start, end));

        start = end;
        part += 1;
    }

    chunks
}

/// Chunk a sequence of units, preserving their order.
pub fn chunk_units(units: &[ContentUnit], max_chunk_chars: usize) -> Vec<Chunk> {
    units
        .iter()
        .flat_map(|unit| chunk_unit(unit, max_chunk_chars))
        .collect()
}

fn make_chunk(unit: &ContentUnit, part: u32, text: &str, start: usize, end: usize) -> Chunk {
    Chunk {
        location: unit.location.clone(),
        part,
        text: text.to_string(),
        start,
        end,
    }
}
