//! YAML frontmatter: splitting it from the body and resolving document metadata.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{Result, SifterError};
use super::metadata::{taxonomy_from_path, title_from_path};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CollectionField {
    Path(String),
    Segments(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum YearField {
    Number(i64),
    Text(String),
}

/// Raw frontmatter as written by authors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub religion: Option<String>,
    collection: Option<CollectionField>,
    pub language: Option<String>,
    year: Option<YearField>,
    pub description: Option<String>,
    /// Forces (or disables) AI segmentation regardless of language.
    pub auto_segment: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml_ng::Value>,
}

impl Frontmatter {
    pub fn collection(&self) -> Option<Vec<String>> {
        let segments: Vec<String> = match self.collection.as_ref()? {
            CollectionField::Path(p) => p.split('/').map(|s| s.trim().to_string()).collect(),
            CollectionField::Segments(s) => s.iter().map(|s| s.trim().to_string()).collect(),
        };
        let segments: Vec<String> = segments.into_iter().filter(|s| !s.is_empty()).collect();
        (!segments.is_empty()).then_some(segments)
    }

    pub fn year(&self) -> Option<String> {
        match self.year.as_ref()? {
            YearField::Number(n) => Some(n.to_string()),
            YearField::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
            YearField::Text(_) => None,
        }
    }
}

/// Split `---` fenced frontmatter from the body.
///
/// Returns `(Some(yaml), body)` when the file opens with a fence that is closed by a `---`
/// or `...` line; otherwise `(None, raw)`.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = text
        .strip_prefix("---\r\n")
        .or_else(|| text.strip_prefix("---\n"))
    else {
        return (None, raw);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" || trimmed == "..." {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    (None, raw)
}

pub fn parse_frontmatter(yaml: &str) -> Result<Frontmatter> {
    if yaml.trim().is_empty() {
        return Ok(Frontmatter::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| SifterError::Parse(format!("frontmatter: {}", e)))
}

/// Metadata of a document after frontmatter and path have been combined
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMeta {
    pub title: String,
    pub author: Option<String>,
    pub religion: Option<String>,
    pub collection: Vec<String>,
    pub language: Option<String>,
    pub year: Option<String>,
    pub description: Option<String>,
    pub auto_segment: Option<bool>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DocumentMeta {
    pub fn has_taxonomy(&self) -> bool {
        self.religion.as_deref().is_some_and(|r| !r.trim().is_empty()) && !self.collection.is_empty()
    }
}

/// Frontmatter wins over the path; the path supplies religion, collection and title
/// when frontmatter does not.
pub fn resolve_metadata(relative_path: &str, fm: Frontmatter) -> Result<DocumentMeta> {
    let (path_religion, path_collection) = taxonomy_from_path(relative_path);
    let collection = fm.collection().unwrap_or(path_collection);
    let year = fm.year();

    let mut extra = serde_json::Map::new();
    for (key, value) in &fm.extra {
        let value = serde_json::to_value(value)
            .map_err(|e| SifterError::Parse(format!("frontmatter field {}: {}", key, e)))?;
        extra.insert(key.clone(), value);
    }

    let non_empty = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    Ok(DocumentMeta {
        title: non_empty(fm.title).unwrap_or_else(|| title_from_path(relative_path)),
        author: non_empty(fm.author),
        religion: non_empty(fm.religion).or(path_religion),
        collection,
        language: non_empty(fm.language).map(|l| l.to_lowercase()),
        year,
        description: non_empty(fm.description),
        auto_segment: fm.auto_segment,
        extra,
    })
}
