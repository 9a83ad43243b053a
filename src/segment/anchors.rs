//! Turning oracle phrase anchors into byte offsets and cutting text at them.

use crate::matcher::{locate_from, Strategy};
use crate::oracle::BreakSuggestion;
use super::language::ends_with_function_word;

const ANCHOR_STRATEGIES: [Strategy; 2] = [Strategy::Exact, Strategy::WhitespaceNormalized];

/// A cut is at a word boundary when whitespace sits on either side of it.
pub fn is_word_boundary(text: &str, offset: usize) -> bool {
    if offset == 0 || offset >= text.len() {
        return true;
    }
    if !text.is_char_boundary(offset) {
        return false;
    }
    text[..offset].ends_with(char::is_whitespace) || text[offset..].starts_with(char::is_whitespace)
}

/// Move `offset` to a word boundary, searching forward first and then backward, at most
/// `window` characters each way. `None` when no boundary is close enough.
///
/// With `avoid_function_words`, boundaries that would leave the preceding text ending on an
/// Arabic function word are skipped.
pub fn snap_to_boundary(
    text: &str,
    offset: usize,
    window: usize,
    avoid_function_words: bool,
) -> Option<usize> {
    let acceptable = |o: usize| {
        is_word_boundary(text, o) && !(avoid_function_words && ends_with_function_word(&text[..o]))
    };

    if text.is_char_boundary(offset) && acceptable(offset) {
        return Some(offset);
    }

    let mut forward = offset;
    for _ in 0..window {
        forward = next_char_boundary(text, forward)?;
        if forward >= text.len() {
            break;
        }
        if acceptable(forward) {
            return Some(forward);
        }
    }

    let mut backward = offset;
    for _ in 0..window {
        backward = prev_char_boundary(text, backward)?;
        if backward == 0 {
            break;
        }
        if acceptable(backward) {
            return Some(backward);
        }
    }
    None
}

fn next_char_boundary(text: &str, offset: usize) -> Option<usize> {
    if offset >= text.len() {
        return None;
    }
    (offset + 1..=text.len()).find(|&i| text.is_char_boundary(i))
}

fn prev_char_boundary(text: &str, offset: usize) -> Option<usize> {
    if offset == 0 {
        return None;
    }
    (0..offset).rev().find(|&i| text.is_char_boundary(i))
}

/// Resolve oracle anchors to sorted, de-duplicated cut offsets inside `text`.
///
/// The start phrase locates the cut directly, searched after the end phrase when that is
/// found; when the start phrase cannot be found the end of the end phrase is used instead.
/// Anchors are searched from the previous accepted cut so a repeated phrase resolves to its
/// next occurrence. Unresolvable anchors are discarded.
pub fn resolve_breaks(
    text: &str,
    breaks: &[BreakSuggestion],
    snap_window: usize,
    avoid_function_words: bool,
) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(breaks.len());
    let mut cursor = 0;

    for suggestion in breaks {
        let end = locate_from(text, &suggestion.end_phrase, cursor, &ANCHOR_STRATEGIES).map(|m| m.end);
        let raw = locate_from(text, &suggestion.start_phrase, end.unwrap_or(cursor), &ANCHOR_STRATEGIES)
            .map(|m| m.start)
            .or(end);

        let Some(raw) = raw else {
            log::debug!("Discarding unresolvable break anchor {:?}", suggestion.start_phrase);
            continue;
        };
        let Some(offset) = snap_to_boundary(text, raw, snap_window, avoid_function_words) else {
            log::debug!("No word boundary near offset {}", raw);
            continue;
        };
        if offset == 0 || offset >= text.len() || text[..offset].trim().is_empty() {
            continue;
        }
        offsets.push(offset);
        cursor = cursor.max(offset);
    }

    offsets.sort_unstable();
    offsets.dedup();
    offsets
}

/// Cut `text` at `offsets`, trimming each piece and dropping empty ones
pub fn cut_at(text: &str, offsets: &[usize]) -> Vec<String> {
    let mut pieces = Vec::with_capacity(offsets.len() + 1);
    let mut start = 0;
    for &offset in offsets.iter().chain(std::iter::once(&text.len())) {
        if offset <= start || !text.is_char_boundary(offset) {
            continue;
        }
        let piece = text[start..offset].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        start = offset;
    }
    pieces
}
