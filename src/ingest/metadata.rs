use sha2::{Digest, Sha256};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::markers;
use crate::matcher::is_punctuation;

/// Hex SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash of the whole raw file, frontmatter included
pub fn compute_file_hash(raw: &str) -> String {
    sha256_hex(raw.as_bytes())
}

/// Hash of the body after frontmatter is removed; surrounding whitespace is ignored
pub fn compute_body_hash(body: &str) -> String {
    sha256_hex(body.trim().as_bytes())
}

/// Hash of the exact stored paragraph text (markers included)
pub fn content_hash(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Paragraph text with markers removed, typographic punctuation unified, case folded and
/// whitespace collapsed. Re-segmenting a paragraph (moving markers, re-wrapping lines)
/// leaves this unchanged.
pub fn word_normalize(text: &str) -> String {
    let stripped = markers::strip(text);
    let mut out = String::with_capacity(stripped.len());
    let mut pending_space = false;

    for c in stripped.nfc() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        let c = match c {
            '‘' | '’' | 'ʼ' | '`' | '´' => '\'',
            '“' | '”' | '«' | '»' => '"',
            '–' | '—' | '‐' => '-',
            other => other,
        };
        if pending_space && !matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '،' | '؛' | '؟') {
            out.push(' ');
        }
        pending_space = false;
        out.extend(c.to_lowercase());
    }
    out
}

/// Word-level hash used to match paragraphs across re-segmentation
pub fn word_hash(text: &str) -> String {
    sha256_hex(word_normalize(text).as_bytes())
}

/// Letters and digits only: markers, punctuation and diacritics removed, case folded.
/// Two paragraphs with the same normalized form share one embedding.
pub fn dedup_normalize(text: &str) -> String {
    let stripped = markers::strip(text);
    let mut out = String::with_capacity(stripped.len());
    let mut pending_space = false;

    for c in stripped.nfd() {
        if is_combining_mark(c) || is_apostrophe(c) {
            continue;
        }
        if c.is_whitespace() || is_punctuation(c) {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Cross-document embedding deduplication key
pub fn normalized_hash(text: &str) -> String {
    sha256_hex(dedup_normalize(text).as_bytes())
}

fn is_apostrophe(c: char) -> bool {
    matches!(c, '\'' | '’' | '‘' | 'ʼ' | 'ʻ' | '`')
}

/// URL slug: diacritics folded, apostrophes dropped, everything else that is not a
/// letter or digit collapsed into single hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.nfd() {
        if is_combining_mark(c) || is_apostrophe(c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.nfc().collect()
    }
}

/// Religion and collection derived from a relative path: the first directory is the
/// religion, the remaining directories form the collection.
pub fn taxonomy_from_path(relative_path: &str) -> (Option<String>, Vec<String>) {
    let normalized = relative_path.replace('\\', "/");
    let mut dirs: Vec<String> = normalized
        .split('/')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    // last segment is the file name
    dirs.pop();

    if dirs.is_empty() {
        return (None, Vec::new());
    }
    let religion = dirs.remove(0);
    (Some(religion), dirs)
}

/// File stem used as a title when frontmatter has none
pub fn title_from_path(relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    let file = normalized.rsplit('/').next().unwrap_or(&normalized);
    let stem = match file.rfind('.') {
        Some(i) if i > 0 => &file[..i],
        _ => file,
    };
    stem.replace(['_', '-'], " ").trim().to_string()
}

/// Public URL of a document: `/library/{religion}/{collection...}/{slug}`.
///
/// `None` when the taxonomy is incomplete; such documents get no redirects.
pub fn canonical_url(religion: Option<&str>, collection: &[String], slug: &str) -> Option<String> {
    let religion = religion.filter(|r| !r.trim().is_empty())?;
    if collection.is_empty() || slug.is_empty() {
        return None;
    }
    let mut url = format!("/library/{}", slugify(religion));
    for part in collection {
        url.push('/');
        url.push_str(&slugify(part));
    }
    url.push('/');
    url.push_str(slug);
    Some(url)
}
