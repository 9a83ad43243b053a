/// Characters that end a sentence in the scripts we ingest
fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '؟' | '۔' | '।' | '。' | '׃')
}

/// Byte offset of the `n`th char of `text` (or `text.len()` past the end)
fn byte_at_char(text: &str, start: usize, n: usize) -> usize {
    text[start..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| start + i)
        .unwrap_or(text.len())
}

/// Split `text` into pieces of at most `max_chars` characters without overlap.
///
/// Within the last 20% of each window a cut after sentence punctuation is preferred, then
/// a cut at whitespace; only when neither exists is the text cut mid-word. Pieces are
/// trimmed and never empty, so concatenating them reproduces `text` up to whitespace.
pub fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let window_end = byte_at_char(text, start, max_chars);
        let cut = if window_end >= text.len() {
            text.len()
        } else {
            let search_from = byte_at_char(text, start, max_chars - max_chars / 5);
            let window = &text[search_from..window_end];

            let sentence = window
                .char_indices()
                .rev()
                .find(|(_, c)| is_sentence_end(*c))
                .map(|(i, c)| search_from + i + c.len_utf8());
            let space = || {
                window
                    .char_indices()
                    .rev()
                    .find(|(_, c)| c.is_whitespace())
                    .map(|(i, _)| search_from + i)
            };
            sentence.or_else(space).filter(|&b| b > start).unwrap_or(window_end)
        };

        let piece = text[start..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        start = cut;
    }

    pieces
}
