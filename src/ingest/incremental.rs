//! Change detection: find the stored document an incoming file belongs to and decide how
//! much of the pipeline it needs.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::Result;
use crate::store::documents;
use crate::store::{DocumentRecord, Store};

/// Which lookup step matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Id,
    Path,
    /// Identical file found live under another path whose file is gone.
    FileHash,
    /// Identical body found live under another path whose file is gone.
    BodyHash,
    /// Tombstone at the same path, to be restored.
    Tombstone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExistingDocument {
    pub record: DocumentRecord,
    pub kind: MatchKind,
}

/// Keys an incoming file is matched on
#[derive(Debug, Clone)]
pub struct LookupKeys {
    pub doc_id: Option<i64>,
    pub path: String,
    pub file_hash: String,
    pub body_hash: String,
}

/// Resolve the stored document for an incoming file.
///
/// Priority: live id, live path, file hash elsewhere, body hash elsewhere, tombstone at
/// the path. A hash match under another path is only taken as a move when that path no
/// longer exists under `root`; without a root, copies never claim each other's documents.
pub fn find_existing(conn: &Connection, keys: &LookupKeys, root: Option<&Path>) -> Result<Option<ExistingDocument>> {
    let found = |record: Option<DocumentRecord>, kind| record.map(|record| ExistingDocument { record, kind });
    let vacated = |candidates: Vec<DocumentRecord>| {
        candidates
            .into_iter()
            .find(|d| root.is_some_and(|root| !root.join(&d.file_path).exists()))
    };

    if let Some(id) = keys.doc_id {
        let live = documents::find_by_id(conn, id)?.filter(|d| !d.is_deleted());
        if let Some(existing) = found(live, MatchKind::Id) {
            return Ok(Some(existing));
        }
    }
    if let Some(existing) = found(documents::find_live_by_path(conn, &keys.path)?, MatchKind::Path) {
        return Ok(Some(existing));
    }
    let by_file = vacated(documents::find_live_by_file_hash_elsewhere(conn, &keys.file_hash, &keys.path)?);
    if let Some(existing) = found(by_file, MatchKind::FileHash) {
        return Ok(Some(existing));
    }
    let by_body = vacated(documents::find_live_by_body_hash_elsewhere(conn, &keys.body_hash, &keys.path)?);
    if let Some(existing) = found(by_body, MatchKind::BodyHash) {
        return Ok(Some(existing));
    }
    Ok(found(documents::find_tombstone_by_path(conn, &keys.path)?, MatchKind::Tombstone))
}

pub async fn lookup(store: &Store, keys: LookupKeys, root: Option<PathBuf>) -> Result<Option<ExistingDocument>> {
    store
        .db()
        .with_connection(move |conn| find_existing(conn, &keys, root.as_deref()))
        .await
}

/// How much work an incoming file needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    /// Same file at the same path: nothing to write.
    Unchanged,
    /// Same file under a new path: path and taxonomy only.
    MovedOnly,
    /// Same body: metadata only, paragraphs untouched.
    MetadataOnly,
    /// Full pipeline and paragraph diff.
    ContentChanged,
}

impl Classification {
    pub fn needs_segmentation(self) -> bool {
        matches!(self, Classification::New | Classification::ContentChanged)
    }
}

pub fn classify(existing: Option<&DocumentRecord>, keys: &LookupKeys, force: bool) -> Classification {
    let Some(doc) = existing else {
        return Classification::New;
    };
    if force {
        return Classification::ContentChanged;
    }
    if doc.is_deleted() {
        // restore brings the old paragraphs back; only the body decides whether they still fit
        return if doc.body_hash == keys.body_hash {
            Classification::MetadataOnly
        } else {
            Classification::ContentChanged
        };
    }
    if doc.file_hash == keys.file_hash {
        if doc.file_path == keys.path {
            Classification::Unchanged
        } else {
            Classification::MovedOnly
        }
    } else if doc.body_hash == keys.body_hash {
        Classification::MetadataOnly
    } else {
        Classification::ContentChanged
    }
}
