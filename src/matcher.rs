//! Phrase location with a ranked list of strategies.
//!
//! Each strategy either finds the phrase and reports the byte range in the original text
//! or reports no match; callers pass the strategies they accept, strictest first.

use std::collections::HashSet;

/// Minimum share of the phrase's word bigrams a window must contain to count as an n-gram match.
const NGRAM_MIN_SCORE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Byte-exact substring.
    Exact,
    /// Runs of whitespace compare equal to a single space.
    WhitespaceNormalized,
    /// Case-insensitive, punctuation ignored, whitespace collapsed.
    CaseFolded,
    /// Best window of words sharing most word bigrams with the phrase.
    NGram,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhraseMatch {
    pub start: usize,
    pub end: usize,
    pub strategy: Strategy,
    pub score: f32,
}

impl Strategy {
    /// Find `needle` in `haystack` at or after byte offset `from`.
    pub fn find(self, haystack: &str, needle: &str, from: usize) -> Option<PhraseMatch> {
        if needle.trim().is_empty() || from > haystack.len() || !haystack.is_char_boundary(from) {
            return None;
        }
        let tail = &haystack[from..];
        let found = match self {
            Strategy::Exact => tail.find(needle).map(|i| (i, i + needle.len(), 1.0)),
            Strategy::WhitespaceNormalized => find_normalized(tail, needle, false),
            Strategy::CaseFolded => find_normalized(tail, needle, true),
            Strategy::NGram => find_ngram(tail, needle),
        }?;
        Some(PhraseMatch {
            start: from + found.0,
            end: from + found.1,
            strategy: self,
            score: found.2,
        })
    }
}

/// Try each strategy in order over the whole text.
pub fn locate(haystack: &str, needle: &str, strategies: &[Strategy]) -> Option<PhraseMatch> {
    locate_from(haystack, needle, 0, strategies)
}

/// Try each strategy in order, searching from byte offset `from`.
pub fn locate_from(
    haystack: &str,
    needle: &str,
    from: usize,
    strategies: &[Strategy],
) -> Option<PhraseMatch> {
    strategies.iter().find_map(|s| s.find(haystack, needle, from))
}

/// Text rewritten by a normalizer, remembering where every output char came from.
struct Normalized {
    text: String,
    /// (offset in `text`, original start, original end) for each output char.
    origins: Vec<(usize, usize, usize)>,
}

impl Normalized {
    fn build(source: &str, fold: bool) -> Self {
        let mut text = String::with_capacity(source.len());
        let mut origins: Vec<(usize, usize, usize)> = Vec::with_capacity(source.len());
        let mut in_space = false;

        for (i, c) in source.char_indices() {
            let end = i + c.len_utf8();
            if c.is_whitespace() {
                if in_space {
                    if let Some(last) = origins.last_mut() {
                        last.2 = end;
                    }
                } else {
                    origins.push((text.len(), i, end));
                    text.push(' ');
                    in_space = true;
                }
                continue;
            }
            if fold && is_punctuation(c) {
                continue;
            }
            in_space = false;
            if fold {
                for lower in c.to_lowercase() {
                    origins.push((text.len(), i, end));
                    text.push(lower);
                }
            } else {
                origins.push((text.len(), i, end));
                text.push(c);
            }
        }

        Self { text, origins }
    }

    fn original_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let first = self.origins.binary_search_by_key(&start, |o| o.0).ok()?;
        let last = self.origins.partition_point(|o| o.0 < end).checked_sub(1)?;
        Some((self.origins[first].1, self.origins[last].2))
    }
}

fn find_normalized(haystack: &str, needle: &str, fold: bool) -> Option<(usize, usize, f32)> {
    let hay = Normalized::build(haystack, fold);
    let needle = Normalized::build(needle.trim(), fold);
    let pattern = needle.text.trim();
    if pattern.is_empty() {
        return None;
    }
    let at = hay.text.find(pattern)?;
    let (start, end) = hay.original_range(at, at + pattern.len())?;
    Some((start, end, if fold { 0.9 } else { 0.95 }))
}

pub(crate) fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '،' | '؛' | '؟' | '۔' | '«' | '»' | '“' | '”' | '‘' | '’' | '—' | '–' | '…' | '·' | '¡' | '¿'
        )
        || (!c.is_alphanumeric() && !c.is_whitespace() && !is_combining(c))
}

fn is_combining(c: char) -> bool {
    unicode_normalization::char::is_combining_mark(c)
}

/// Words of `text` with their byte ranges, lowercased and stripped of punctuation.
fn words(text: &str) -> Vec<(String, usize, usize)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut end = 0;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if !current.is_empty() {
                out.push((std::mem::take(&mut current), start, end));
            }
            continue;
        }
        if current.is_empty() {
            start = i;
        }
        end = i + c.len_utf8();
        if !is_punctuation(c) {
            current.extend(c.to_lowercase());
        }
    }
    if !current.is_empty() {
        out.push((current, start, end));
    }
    out.retain(|(w, _, _)| !w.is_empty());
    out
}

fn bigrams(words: &[&str]) -> HashSet<(String, String)> {
    if words.len() == 1 {
        return std::iter::once((words[0].to_string(), String::new())).collect();
    }
    words
        .windows(2)
        .map(|w| (w[0].to_string(), w[1].to_string()))
        .collect()
}

fn find_ngram(haystack: &str, needle: &str) -> Option<(usize, usize, f32)> {
    let hay_words = words(haystack);
    let needle_words = words(needle);
    let n = needle_words.len();
    if n == 0 || hay_words.len() < n {
        return None;
    }
    let wanted = bigrams(&needle_words.iter().map(|w| w.0.as_str()).collect::<Vec<_>>());

    let mut best: Option<(usize, f32)> = None;
    for (i, window) in hay_words.windows(n).enumerate() {
        let have = bigrams(&window.iter().map(|w| w.0.as_str()).collect::<Vec<_>>());
        let score = wanted.intersection(&have).count() as f32 / wanted.len() as f32;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }

    let (i, score) = best?;
    if score < NGRAM_MIN_SCORE {
        return None;
    }
    Some((hay_words[i].1, hay_words[i + n - 1].2, score))
}

/// Locate every phrase with all strategies and return non-overlapping matches in text order.
pub fn highlight_spans(text: &str, phrases: &[String]) -> Vec<PhraseMatch> {
    let strategies = [
        Strategy::Exact,
        Strategy::WhitespaceNormalized,
        Strategy::CaseFolded,
        Strategy::NGram,
    ];
    let mut found: Vec<PhraseMatch> = phrases
        .iter()
        .filter_map(|p| locate(text, p, &strategies))
        .collect();
    found.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut out: Vec<PhraseMatch> = Vec::with_capacity(found.len());
    for m in found {
        if out.last().map_or(true, |prev| m.start >= prev.end) {
            out.push(m);
        }
    }
    out
}

/// Wrap each span of `text` with `open`/`close`.
pub fn apply_highlights(text: &str, spans: &[PhraseMatch], open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len() + spans.len() * (open.len() + close.len()));
    let mut cursor = 0;
    for span in spans {
        out.push_str(&text[cursor..span.start]);
        out.push_str(open);
        out.push_str(&text[span.start..span.end]);
        out.push_str(close);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}
