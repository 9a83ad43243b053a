use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, SifterError};

const DOCUMENT_COLUMNS: &str = "id, file_path, title, author, religion, collection, language, year, \
     description, extra_json, file_hash, body_hash, slug, paragraph_count, auto_segmented, \
     created_at, updated_at, deleted_at";

/// A stored document row
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: i64,
    pub file_path: String,
    pub title: String,
    pub author: Option<String>,
    pub religion: Option<String>,
    pub collection: Vec<String>,
    pub language: Option<String>,
    pub year: Option<String>,
    pub description: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub file_hash: String,
    pub body_hash: String,
    pub slug: String,
    pub paragraph_count: i64,
    pub auto_segmented: bool,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl DocumentRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let collection: String = row.get(5)?;
        let extra: String = row.get(9)?;
        Ok(Self {
            id: row.get(0)?,
            file_path: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            religion: row.get(4)?,
            collection: serde_json::from_str(&collection).unwrap_or_default(),
            language: row.get(6)?,
            year: row.get(7)?,
            description: row.get(8)?,
            extra: serde_json::from_str(&extra).unwrap_or_default(),
            file_hash: row.get(10)?,
            body_hash: row.get(11)?,
            slug: row.get(12)?,
            paragraph_count: row.get(13)?,
            auto_segmented: row.get::<_, i64>(14)? != 0,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
            deleted_at: row.get(17)?,
        })
    }
}

/// Everything the ingester writes about a document besides its paragraphs
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFields {
    pub file_path: String,
    pub title: String,
    pub author: Option<String>,
    pub religion: Option<String>,
    pub collection: Vec<String>,
    pub language: Option<String>,
    pub year: Option<String>,
    pub description: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub file_hash: String,
    pub body_hash: String,
    /// `None` keeps the stored flag (metadata-only updates).
    pub auto_segmented: Option<bool>,
}

pub(crate) fn collection_json(collection: &[String]) -> Result<String> {
    serde_json::to_string(collection).map_err(|e| SifterError::Parse(format!("collection: {}", e)))
}

fn extra_json(extra: &serde_json::Map<String, serde_json::Value>) -> Result<String> {
    serde_json::to_string(extra).map_err(|e| SifterError::Parse(format!("extra metadata: {}", e)))
}

fn query_one(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> Result<Option<DocumentRecord>> {
    let sql = format!("SELECT {} FROM documents WHERE {} LIMIT 1", DOCUMENT_COLUMNS, filter);
    Ok(conn
        .query_row(&sql, params, DocumentRecord::from_row)
        .optional()?)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<DocumentRecord>> {
    query_one(conn, "id = ?1", params![id])
}

pub fn find_live_by_path(conn: &Connection, path: &str) -> Result<Option<DocumentRecord>> {
    query_one(conn, "file_path = ?1 AND deleted_at IS NULL", params![path])
}

fn query_all(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> Result<Vec<DocumentRecord>> {
    let sql = format!("SELECT {} FROM documents WHERE {}", DOCUMENT_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, DocumentRecord::from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

/// Live documents with this exact file hash stored under a different path, oldest first
pub fn find_live_by_file_hash_elsewhere(conn: &Connection, file_hash: &str, path: &str) -> Result<Vec<DocumentRecord>> {
    query_all(
        conn,
        "file_hash = ?1 AND file_path != ?2 AND deleted_at IS NULL ORDER BY id",
        params![file_hash, path],
    )
}

/// Live documents with this body hash stored under a different path, oldest first
pub fn find_live_by_body_hash_elsewhere(conn: &Connection, body_hash: &str, path: &str) -> Result<Vec<DocumentRecord>> {
    query_all(
        conn,
        "body_hash = ?1 AND file_path != ?2 AND deleted_at IS NULL ORDER BY id",
        params![body_hash, path],
    )
}

pub fn find_tombstone_by_path(conn: &Connection, path: &str) -> Result<Option<DocumentRecord>> {
    query_one(conn, "file_path = ?1 AND deleted_at IS NOT NULL", params![path])
}

/// Whether a live document other than `exclude_id` holds `slug` in this religion and collection
pub fn slug_taken(
    conn: &Connection,
    religion: Option<&str>,
    collection: &str,
    slug: &str,
    exclude_id: Option<i64>,
) -> Result<bool> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM documents
            WHERE religion IS ?1 AND collection = ?2 AND slug = ?3
              AND deleted_at IS NULL AND id IS NOT ?4
        )",
        params![religion, collection, slug, exclude_id],
        |row| row.get(0),
    )?;
    Ok(taken)
}

/// Pick a slug unique within the document's religion and collection: `base`, `base-2`, ...
///
/// `current` is kept when it is still free and was derived from the same base.
pub fn allocate_slug(
    conn: &Connection,
    religion: Option<&str>,
    collection: &[String],
    base: &str,
    current: Option<&str>,
    exclude_id: Option<i64>,
) -> Result<String> {
    let collection = collection_json(collection)?;

    if let Some(current) = current {
        let same_base = current == base
            || current
                .strip_prefix(base)
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|n| n.parse::<u32>().is_ok_and(|n| n >= 2));
        if same_base && !slug_taken(conn, religion, &collection, current, exclude_id)? {
            return Ok(current.to_string());
        }
    }

    if !slug_taken(conn, religion, &collection, base, exclude_id)? {
        return Ok(base.to_string());
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !slug_taken(conn, religion, &collection, &candidate, exclude_id)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

pub fn insert_document(conn: &Connection, fields: &DocumentFields, slug: &str, now: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO documents (
            file_path, title, author, religion, collection, language, year, description,
            extra_json, file_hash, body_hash, slug, paragraph_count, auto_segmented,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?14, ?14)",
        params![
            fields.file_path,
            fields.title,
            fields.author,
            fields.religion,
            collection_json(&fields.collection)?,
            fields.language,
            fields.year,
            fields.description,
            extra_json(&fields.extra)?,
            fields.file_hash,
            fields.body_hash,
            slug,
            fields.auto_segmented.unwrap_or(false),
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_document(
    conn: &Connection,
    id: i64,
    fields: &DocumentFields,
    slug: &str,
    now: &str,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE documents SET
            file_path = ?2, title = ?3, author = ?4, religion = ?5, collection = ?6,
            language = ?7, year = ?8, description = ?9, extra_json = ?10, file_hash = ?11,
            body_hash = ?12, slug = ?13, auto_segmented = COALESCE(?14, auto_segmented),
            updated_at = ?15, deleted_at = NULL
         WHERE id = ?1",
        params![
            id,
            fields.file_path,
            fields.title,
            fields.author,
            fields.religion,
            collection_json(&fields.collection)?,
            fields.language,
            fields.year,
            fields.description,
            extra_json(&fields.extra)?,
            fields.file_hash,
            fields.body_hash,
            slug,
            fields.auto_segmented,
            now,
        ],
    )?;
    if rows == 0 {
        return Err(SifterError::DocumentNotFound(id.to_string()));
    }
    Ok(())
}

pub fn set_paragraph_count(conn: &Connection, id: i64) -> Result<i64> {
    conn.execute(
        "UPDATE documents SET paragraph_count =
            (SELECT COUNT(*) FROM paragraphs WHERE doc_id = ?1 AND deleted_at IS NULL)
         WHERE id = ?1",
        params![id],
    )?;
    let count = conn.query_row(
        "SELECT paragraph_count FROM documents WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Tombstone a document and its live paragraphs with one shared timestamp
pub fn soft_delete(conn: &Connection, id: i64, now: &str) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE documents SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id, now],
    )?;
    if rows == 0 {
        return Ok(0);
    }
    let paragraphs = conn.execute(
        "UPDATE paragraphs SET deleted_at = ?2, updated_at = ?2, needs_sync = 1
         WHERE doc_id = ?1 AND deleted_at IS NULL",
        params![id, now],
    )?;
    Ok(paragraphs)
}

/// Revive a tombstoned document together with the paragraphs deleted alongside it.
/// Paragraphs that were already stale before the document was deleted stay deleted.
pub fn restore(conn: &Connection, doc: &DocumentRecord, now: &str) -> Result<usize> {
    let Some(deleted_at) = doc.deleted_at.as_deref() else {
        return Ok(0);
    };
    let paragraphs = conn.execute(
        "UPDATE paragraphs SET deleted_at = NULL, updated_at = ?3, needs_sync = 1
         WHERE doc_id = ?1 AND deleted_at = ?2",
        params![doc.id, deleted_at, now],
    )?;
    conn.execute(
        "UPDATE documents SET deleted_at = NULL, updated_at = ?2 WHERE id = ?1",
        params![doc.id, now],
    )?;
    Ok(paragraphs)
}

/// Hard-delete tombstones occupying `path` other than `keep_id`
pub fn purge_tombstones_at(conn: &Connection, path: &str, keep_id: Option<i64>) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM documents WHERE file_path = ?1 AND deleted_at IS NOT NULL AND id IS NOT ?2",
        params![path, keep_id],
    )?)
}

/// Hard-delete a live document other than `keep_id` that holds `path`, so another
/// document can move onto it. Its paragraphs and redirects cascade.
pub fn displace_live_at(conn: &Connection, path: &str, keep_id: i64) -> Result<Option<i64>> {
    let Some(doc) = find_live_by_path(conn, path)?.filter(|d| d.id != keep_id) else {
        return Ok(None);
    };
    conn.execute("DELETE FROM documents WHERE id = ?1", params![doc.id])?;
    Ok(Some(doc.id))
}

/// Hard-delete documents tombstoned before `cutoff`; paragraphs and redirects cascade.
pub fn purge_deleted_before(conn: &Connection, cutoff: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM documents WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
        params![cutoff],
    )?)
}

/// (id, path) of every live document
pub fn live_paths(conn: &Connection) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT id, file_path FROM documents WHERE deleted_at IS NULL ORDER BY file_path")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::migrated_connection;

    fn fields(path: &str, title: &str) -> DocumentFields {
        DocumentFields {
            file_path: path.to_string(),
            title: title.to_string(),
            author: None,
            religion: Some("Baha'i".to_string()),
            collection: vec!["Writings".to_string()],
            language: Some("en".to_string()),
            year: None,
            description: None,
            extra: serde_json::Map::new(),
            file_hash: format!("file-{}", path),
            body_hash: format!("body-{}", path),
            auto_segmented: Some(false),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let (_dir, conn) = migrated_connection();
        let id = insert_document(&conn, &fields("a.md", "A"), "a", "2026-01-01T00:00:00.000Z").unwrap();
        let doc = find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(doc.file_path, "a.md");
        assert_eq!(doc.collection, vec!["Writings".to_string()]);
        assert!(find_live_by_path(&conn, "a.md").unwrap().is_some());
        assert!(find_live_by_file_hash_elsewhere(&conn, "file-a.md", "a.md").unwrap().is_empty());
        assert_eq!(find_live_by_file_hash_elsewhere(&conn, "file-a.md", "b.md").unwrap().len(), 1);
        assert_eq!(find_live_by_body_hash_elsewhere(&conn, "body-a.md", "c.md").unwrap().len(), 1);
    }

    #[test]
    fn test_allocate_slug_suffixes_and_keeps_current() {
        let (_dir, conn) = migrated_connection();
        let religion = Some("Baha'i");
        let collection = vec!["Writings".to_string()];

        let first = allocate_slug(&conn, religion, &collection, "the-hidden-words", None, None).unwrap();
        assert_eq!(first, "the-hidden-words");
        let id = insert_document(&conn, &fields("a.md", "The Hidden Words"), &first, "t").unwrap();

        let second = allocate_slug(&conn, religion, &collection, "the-hidden-words", None, None).unwrap();
        assert_eq!(second, "the-hidden-words-2");
        insert_document(&conn, &fields("b.md", "The Hidden Words"), &second, "t").unwrap();

        // a document keeps its own slug
        let kept = allocate_slug(&conn, religion, &collection, "the-hidden-words", Some("the-hidden-words"), Some(id)).unwrap();
        assert_eq!(kept, "the-hidden-words");

        // other collections are independent
        let other = allocate_slug(&conn, religion, &["Prayers".to_string()], "the-hidden-words", None, None).unwrap();
        assert_eq!(other, "the-hidden-words");
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let (_dir, conn) = migrated_connection();
        let id = insert_document(&conn, &fields("a.md", "A"), "a", "t0").unwrap();
        conn.execute(
            "INSERT INTO paragraphs (doc_id, position, text, content_hash, word_hash, normalized_hash, created_at, updated_at, deleted_at)
             VALUES (?1, 0, 'live', 'c', 'w', 'n', 't0', 't0', NULL), (?1, 1, 'stale', 'c2', 'w2', 'n2', 't0', 't0', 't-stale')",
            params![id],
        )
        .unwrap();

        assert_eq!(soft_delete(&conn, id, "t1").unwrap(), 1);
        assert!(find_live_by_path(&conn, "a.md").unwrap().is_none());
        let tombstone = find_tombstone_by_path(&conn, "a.md").unwrap().unwrap();
        assert_eq!(tombstone.deleted_at.as_deref(), Some("t1"));

        assert_eq!(restore(&conn, &tombstone, "t2").unwrap(), 1);
        let live: i64 = conn
            .query_row("SELECT COUNT(*) FROM paragraphs WHERE doc_id = ?1 AND deleted_at IS NULL", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(live, 1);
        assert!(find_live_by_path(&conn, "a.md").unwrap().is_some());
    }

    #[test]
    fn test_purge_deleted_before() {
        let (_dir, conn) = migrated_connection();
        let old = insert_document(&conn, &fields("old.md", "Old"), "old", "t").unwrap();
        let recent = insert_document(&conn, &fields("new.md", "New"), "new", "t").unwrap();
        soft_delete(&conn, old, "2026-01-01T00:00:00.000Z").unwrap();
        soft_delete(&conn, recent, "2026-03-01T00:00:00.000Z").unwrap();

        assert_eq!(purge_deleted_before(&conn, "2026-02-01T00:00:00.000Z").unwrap(), 1);
        assert!(find_by_id(&conn, old).unwrap().is_none());
        assert!(find_by_id(&conn, recent).unwrap().is_some());
    }
}
