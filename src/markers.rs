//! Sentence and phrase boundary markers.
//!
//! Markers are written as `⁅s3⁆ … ⁅/s3⁆` (sentence) and `⁅p1⁆ … ⁅/p1⁆` (phrase). The
//! bracket characters U+2045/U+2046 do not occur in library sources, so marking needs no
//! escaping and [`strip`] is an exact left inverse of [`wrap`].

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Result, SifterError};
use crate::matcher::{self, Strategy};

pub const OPEN: char = '⁅';
pub const CLOSE: char = '⁆';

/// Characters of context shown on each side of a round-trip mismatch.
const CONTEXT_CHARS: usize = 24;

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"⁅(/?)([sp])(\d+)⁆").expect("marker regex is valid"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Sentence,
    Phrase,
}

impl MarkerKind {
    pub fn tag(self) -> char {
        match self {
            MarkerKind::Sentence => 's',
            MarkerKind::Phrase => 'p',
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "s" => Some(MarkerKind::Sentence),
            "p" => Some(MarkerKind::Phrase),
            _ => None,
        }
    }
}

pub fn open_marker(kind: MarkerKind, id: u32) -> String {
    format!("{}{}{}{}", OPEN, kind.tag(), id, CLOSE)
}

pub fn close_marker(kind: MarkerKind, id: u32) -> String {
    format!("{}/{}{}{}", OPEN, kind.tag(), id, CLOSE)
}

/// Surround `text` with an open/close pair.
pub fn wrap(text: &str, kind: MarkerKind, id: u32) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    out.push_str(&open_marker(kind, id));
    out.push_str(text);
    out.push_str(&close_marker(kind, id));
    out
}

/// Remove every marker token.
pub fn strip(text: &str) -> String {
    if !contains_markers(text) {
        return text.to_string();
    }
    marker_regex().replace_all(text, "").into_owned()
}

pub fn contains_markers(text: &str) -> bool {
    text.contains(OPEN)
}

/// One matched open/close pair.
///
/// `start`/`end` are byte offsets of the inner content in the marked text;
/// `inner_text` is that content with nested markers stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSpan {
    pub kind: MarkerKind,
    pub id: u32,
    pub inner_text: String,
    pub start: usize,
    pub end: usize,
}

struct Token {
    closing: bool,
    kind: MarkerKind,
    id: u32,
    start: usize,
    end: usize,
}

fn tokens(text: &str) -> impl Iterator<Item = Token> + '_ {
    marker_regex().captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        let kind = MarkerKind::from_tag(caps.get(2)?.as_str())?;
        let id = caps.get(3)?.as_str().parse::<u32>().ok()?;
        Some(Token {
            closing: !caps.get(1)?.as_str().is_empty(),
            kind,
            id,
            start: whole.start(),
            end: whole.end(),
        })
    })
}

/// Walk the markers of `text` and return the matched spans ordered by start offset.
///
/// Unmatched closers are skipped and unclosed openers are dropped; both are logged.
pub fn parse(text: &str) -> Vec<MarkerSpan> {
    let mut stack: Vec<(MarkerKind, u32, usize)> = Vec::new();
    let mut spans = Vec::new();

    for token in tokens(text) {
        if !token.closing {
            stack.push((token.kind, token.id, token.end));
            continue;
        }
        match stack
            .iter()
            .rposition(|(kind, id, _)| *kind == token.kind && *id == token.id)
        {
            Some(pos) => {
                let (kind, id, content_start) = stack.remove(pos);
                spans.push(MarkerSpan {
                    kind,
                    id,
                    inner_text: strip(&text[content_start..token.start]),
                    start: content_start,
                    end: token.start,
                });
            }
            None => log::warn!(
                "ignoring unmatched closing marker {}{} at byte {}",
                token.kind.tag(),
                token.id,
                token.start
            ),
        }
    }

    for (kind, id, start) in stack {
        log::warn!("dropping unclosed marker {}{} opened at byte {}", kind.tag(), id, start);
    }

    spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    spans
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Report structural marker problems without failing.
pub fn validate(text: &str) -> ValidationReport {
    let mut errors = Vec::new();
    let mut stack: Vec<(MarkerKind, u32, usize)> = Vec::new();
    let mut seen: std::collections::HashSet<(MarkerKind, u32)> = std::collections::HashSet::new();

    for token in tokens(text) {
        let label = format!("{}{}", token.kind.tag(), token.id);
        if token.id == 0 {
            errors.push(format!("marker {} at byte {} has id 0", label, token.start));
        }
        if !token.closing {
            if !seen.insert((token.kind, token.id)) {
                errors.push(format!("duplicate marker {} at byte {}", label, token.start));
            }
            stack.push((token.kind, token.id, token.start));
            continue;
        }
        match stack
            .iter()
            .rposition(|(kind, id, _)| *kind == token.kind && *id == token.id)
        {
            Some(pos) if pos + 1 == stack.len() => {
                stack.pop();
            }
            Some(pos) => {
                let (inner_kind, inner_id, _) = stack[stack.len() - 1];
                errors.push(format!(
                    "marker {} closed at byte {} crosses open marker {}{}",
                    label,
                    token.start,
                    inner_kind.tag(),
                    inner_id
                ));
                stack.remove(pos);
            }
            None => errors.push(format!("unmatched closing marker {} at byte {}", label, token.start)),
        }
    }

    for (kind, id, start) in stack {
        errors.push(format!("unclosed marker {}{} opened at byte {}", kind.tag(), id, start));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTripReport {
    pub valid: bool,
    pub error: Option<String>,
}

impl RoundTripReport {
    pub fn into_result(self) -> Result<()> {
        match self.error {
            None => Ok(()),
            Some(e) => Err(SifterError::Integrity(e)),
        }
    }
}

/// Check that stripping `marked` reproduces `original` exactly.
pub fn verify_round_trip(original: &str, marked: &str) -> RoundTripReport {
    let stripped = strip(marked);
    if stripped == original {
        return RoundTripReport {
            valid: true,
            error: None,
        };
    }

    let offset = first_difference(original, &stripped);
    RoundTripReport {
        valid: false,
        error: Some(format!(
            "stripped text differs at byte {} (expected {} bytes, got {}): expected {:?}, got {:?}",
            offset,
            original.len(),
            stripped.len(),
            context(original, offset),
            context(&stripped, offset),
        )),
    }
}

fn first_difference(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}

fn context(s: &str, at: usize) -> &str {
    let mut start = at.min(s.len());
    while !s.is_char_boundary(start) {
        start -= 1;
    }
    let before = s[..start]
        .char_indices()
        .rev()
        .nth(CONTEXT_CHARS.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let after = s[start..]
        .char_indices()
        .nth(CONTEXT_CHARS)
        .map(|(i, _)| start + i)
        .unwrap_or(s.len());
    &s[before..after]
}

/// Wrap each verbatim sentence of `text` in a sentence marker, numbering from 1.
///
/// Sentences are located in order; text between them stays outside markers. Returns
/// `None` when no sentence could be located.
pub fn mark_sentences(text: &str, sentences: &[String]) -> Option<(String, usize)> {
    let strategies = [Strategy::Exact, Strategy::WhitespaceNormalized];
    let mut out = String::with_capacity(text.len() + sentences.len() * 12);
    let mut cursor = 0;
    let mut count = 0u32;

    for sentence in sentences {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let Some(found) = matcher::locate_from(text, sentence, cursor, &strategies) else {
            log::debug!("sentence not located, leaving unmarked: {:?}", sentence);
            continue;
        };
        count += 1;
        out.push_str(&text[cursor..found.start]);
        out.push_str(&wrap(&text[found.start..found.end], MarkerKind::Sentence, count));
        cursor = found.end;
    }

    if count == 0 {
        return None;
    }
    out.push_str(&text[cursor..]);
    Some((out, count as usize))
}
