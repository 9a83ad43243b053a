//! Script detection and script-specific heuristics used by the segmenter.

use regex::Regex;
use std::sync::OnceLock;

/// What the segmenter knows about a block's language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageHint {
    /// ISO 639-1 code when the script identifies one (`ar`, `fa`, `he`).
    pub code: Option<String>,
    pub rtl: bool,
}

impl LanguageHint {
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_lowercase();
        let rtl = matches!(code.as_str(), "ar" | "fa" | "he" | "ur");
        Self { code: Some(code), rtl }
    }

    pub fn is_arabic(&self) -> bool {
        self.code.as_deref() == Some("ar")
    }
}

fn is_arabic_script(c: char) -> bool {
    matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' | '\u{08A0}'..='\u{08FF}' | '\u{FB50}'..='\u{FDFF}' | '\u{FE70}'..='\u{FEFF}')
}

fn is_hebrew_script(c: char) -> bool {
    matches!(c, '\u{0590}'..='\u{05FF}')
}

/// Letters that occur in Persian but not in Arabic
fn is_persian_letter(c: char) -> bool {
    matches!(c, 'پ' | 'چ' | 'ژ' | 'گ')
}

/// Guess the language from the dominant script of `text`.
///
/// Arabic script with any Persian-only consonant is `fa`, otherwise `ar`. Latin and other
/// scripts yield no code.
pub fn detect_language(text: &str) -> LanguageHint {
    let mut letters = 0usize;
    let mut arabic = 0usize;
    let mut hebrew = 0usize;
    let mut persian = false;

    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if is_arabic_script(c) {
            arabic += 1;
            persian |= is_persian_letter(c);
        } else if is_hebrew_script(c) {
            hebrew += 1;
        }
    }

    if letters == 0 {
        return LanguageHint { code: None, rtl: false };
    }
    // a script counts once it makes up at least 30% of the letters
    if arabic * 10 >= letters * 3 {
        let code = if persian { "fa" } else { "ar" };
        return LanguageHint { code: Some(code.to_string()), rtl: true };
    }
    if hebrew * 10 >= letters * 3 {
        return LanguageHint { code: Some("he".to_string()), rtl: true };
    }
    LanguageHint { code: None, rtl: false }
}

fn verse_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[(\[﴿]\s*[0-9٠-٩۰-۹]{1,4}\s*[)\]﴾]|۝\s*[0-9٠-٩۰-۹]*|۞")
            .expect("verse marker regex is valid")
    })
}

/// Byte offsets just after every verse/numeral marker
pub fn verse_marker_ends(text: &str) -> Vec<usize> {
    verse_marker_regex().find_iter(text).map(|m| m.end()).collect()
}

pub fn count_verse_markers(text: &str) -> usize {
    verse_marker_regex().find_iter(text).count()
}

/// Short Arabic words that cannot end a segment: prepositions, conjunctions and particles
/// that always introduce what follows.
const ARABIC_FUNCTION_WORDS: &[&str] = &[
    "و", "ف", "ب", "ل", "ك", "في", "من", "على", "إلى", "الى", "عن", "ثم", "أو", "او", "أن", "ان",
    "إن", "لا", "ما", "لم", "لن", "قد", "يا", "التي", "الذي", "الذين", "حتى", "بل", "لكن",
];

/// True when the last word of `segment` is an Arabic function word, i.e. the segment would
/// end mid-phrase.
pub fn ends_with_function_word(segment: &str) -> bool {
    segment
        .split_whitespace()
        .last()
        .map(|w| w.trim_matches(|c: char| !c.is_alphabetic()))
        .is_some_and(|w| ARABIC_FUNCTION_WORDS.contains(&w))
}
