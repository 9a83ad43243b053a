use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

const PARAGRAPH_COLUMNS: &str = "id, doc_id, position, text, content_hash, word_hash, normalized_hash, \
     heading, block_type, embedding IS NOT NULL, deleted_at";

/// A stored paragraph row (embedding bytes are not loaded)
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphRecord {
    pub id: i64,
    pub doc_id: i64,
    pub position: i64,
    pub text: String,
    pub content_hash: String,
    pub word_hash: String,
    pub normalized_hash: String,
    pub heading: Option<String>,
    pub block_type: String,
    pub has_embedding: bool,
    pub deleted_at: Option<String>,
}

impl ParagraphRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            doc_id: row.get(1)?,
            position: row.get(2)?,
            text: row.get(3)?,
            content_hash: row.get(4)?,
            word_hash: row.get(5)?,
            normalized_hash: row.get(6)?,
            heading: row.get(7)?,
            block_type: row.get(8)?,
            has_embedding: row.get(9)?,
            deleted_at: row.get(10)?,
        })
    }
}

/// A paragraph to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewParagraph {
    pub position: i64,
    pub text: String,
    pub content_hash: String,
    pub word_hash: String,
    pub normalized_hash: String,
    pub heading: Option<String>,
    pub block_type: String,
}

/// A reused paragraph whose position or heading changes
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphUpdate {
    pub id: i64,
    pub position: i64,
    pub heading: Option<String>,
    pub block_type: String,
}

/// Paragraph writes for one document, applied in this order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParagraphPlan {
    pub deletes: Vec<i64>,
    pub updates: Vec<ParagraphUpdate>,
    pub inserts: Vec<NewParagraph>,
    /// Stored paragraphs kept as they are (reused without changes).
    pub unchanged: usize,
}

impl ParagraphPlan {
    pub fn reused(&self) -> usize {
        self.updates.len() + self.unchanged
    }

    pub fn is_noop(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.inserts.is_empty()
    }
}

/// Live paragraphs of a document in display order
pub fn live_paragraphs(conn: &Connection, doc_id: i64) -> Result<Vec<ParagraphRecord>> {
    let sql = format!(
        "SELECT {} FROM paragraphs WHERE doc_id = ?1 AND deleted_at IS NULL ORDER BY position",
        PARAGRAPH_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![doc_id], ParagraphRecord::from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

/// Paragraphs tombstoned at exactly `deleted_at`: the ones a document restore would revive
pub fn paragraphs_deleted_at(conn: &Connection, doc_id: i64, deleted_at: &str) -> Result<Vec<ParagraphRecord>> {
    let sql = format!(
        "SELECT {} FROM paragraphs WHERE doc_id = ?1 AND deleted_at = ?2 ORDER BY position",
        PARAGRAPH_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![doc_id, deleted_at], ParagraphRecord::from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

/// Any stored embedding for this normalized hash, tombstones included.
///
/// With `model`, only vectors produced by that model qualify.
pub fn find_embedding(
    conn: &Connection,
    normalized_hash: &str,
    model: Option<&str>,
) -> Result<Option<(Vec<u8>, Option<String>)>> {
    let found = conn
        .query_row(
            "SELECT embedding, embedding_model FROM paragraphs
             WHERE normalized_hash = ?1 AND embedding IS NOT NULL
               AND (?2 IS NULL OR embedding_model = ?2)
             ORDER BY deleted_at IS NOT NULL, id DESC
             LIMIT 1",
            params![normalized_hash, model],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(found)
}

/// Apply a paragraph plan inside the caller's transaction.
///
/// Statements run in groups of `batch_size`. Reused paragraphs are first parked on
/// negative positions so the live `(doc_id, position)` index never sees a collision.
pub fn apply_plan(
    conn: &Connection,
    doc_id: i64,
    plan: &ParagraphPlan,
    batch_size: usize,
    embedding_model: Option<&str>,
    now: &str,
) -> Result<()> {
    let batch_size = batch_size.max(1);

    for (n, batch) in plan.deletes.chunks(batch_size).enumerate() {
        let mut stmt = conn.prepare_cached(
            "UPDATE paragraphs SET deleted_at = ?2, updated_at = ?2, needs_sync = 1
             WHERE id = ?1 AND deleted_at IS NULL",
        )?;
        for id in batch {
            stmt.execute(params![id, now])?;
        }
        log::debug!("doc {}: delete batch {} ({} rows)", doc_id, n + 1, batch.len());
    }

    for batch in plan.updates.chunks(batch_size) {
        let mut stmt = conn.prepare_cached("UPDATE paragraphs SET position = -id WHERE id = ?1")?;
        for update in batch {
            stmt.execute(params![update.id])?;
        }
    }
    for (n, batch) in plan.updates.chunks(batch_size).enumerate() {
        let mut stmt = conn.prepare_cached(
            "UPDATE paragraphs SET position = ?2, heading = ?3, block_type = ?4,
                 needs_sync = 1, updated_at = ?5
             WHERE id = ?1",
        )?;
        for update in batch {
            stmt.execute(params![update.id, update.position, update.heading, update.block_type, now])?;
        }
        log::debug!("doc {}: update batch {} ({} rows)", doc_id, n + 1, batch.len());
    }

    for (n, batch) in plan.inserts.chunks(batch_size).enumerate() {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO paragraphs (
                doc_id, position, text, content_hash, word_hash, normalized_hash, heading,
                block_type, embedding, embedding_model, needs_embedding, needs_sync,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?12)",
        )?;
        for paragraph in batch {
            let reused = find_embedding(conn, &paragraph.normalized_hash, embedding_model)?;
            let needs_embedding = reused.is_none();
            let (embedding, model) = match reused {
                Some((bytes, model)) => (Some(bytes), model),
                None => (None, None),
            };
            stmt.execute(params![
                doc_id,
                paragraph.position,
                paragraph.text,
                paragraph.content_hash,
                paragraph.word_hash,
                paragraph.normalized_hash,
                paragraph.heading,
                paragraph.block_type,
                embedding,
                model,
                needs_embedding,
                now,
            ])?;
        }
        log::debug!("doc {}: insert batch {} ({} rows)", doc_id, n + 1, batch.len());
    }

    Ok(())
}

/// Flag every live paragraph of a document for search re-sync
pub fn mark_document_for_sync(conn: &Connection, doc_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE paragraphs SET needs_sync = 1 WHERE doc_id = ?1 AND deleted_at IS NULL",
        params![doc_id],
    )?)
}

/// Hard-delete paragraph tombstones older than `cutoff`
pub fn purge_deleted_before(conn: &Connection, cutoff: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM paragraphs WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
        params![cutoff],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::documents::{insert_document, DocumentFields};
    use crate::store::tests::migrated_connection;

    fn doc(conn: &Connection, path: &str) -> i64 {
        let fields = DocumentFields {
            file_path: path.to_string(),
            title: path.to_string(),
            author: None,
            religion: Some("Islam".to_string()),
            collection: vec!["Hadith".to_string()],
            language: None,
            year: None,
            description: None,
            extra: serde_json::Map::new(),
            file_hash: path.to_string(),
            body_hash: path.to_string(),
            auto_segmented: None,
        };
        insert_document(conn, &fields, path, "t0").unwrap()
    }

    fn new_paragraph(position: i64, text: &str) -> NewParagraph {
        NewParagraph {
            position,
            text: text.to_string(),
            content_hash: format!("c-{}", text),
            word_hash: format!("w-{}", text),
            normalized_hash: format!("n-{}", text),
            heading: None,
            block_type: "paragraph".to_string(),
        }
    }

    #[test]
    fn test_apply_plan_swaps_positions() {
        let (_dir, conn) = migrated_connection();
        let doc_id = doc(&conn, "a.md");
        let plan = ParagraphPlan {
            inserts: vec![new_paragraph(0, "first"), new_paragraph(1, "second")],
            ..Default::default()
        };
        apply_plan(&conn, doc_id, &plan, 1, None, "t1").unwrap();
        let stored = live_paragraphs(&conn, doc_id).unwrap();
        assert_eq!(stored.len(), 2);

        // swap the two paragraphs: both positions are taken during the update
        let swap = ParagraphPlan {
            updates: vec![
                ParagraphUpdate { id: stored[0].id, position: 1, heading: None, block_type: "paragraph".into() },
                ParagraphUpdate { id: stored[1].id, position: 0, heading: None, block_type: "paragraph".into() },
            ],
            ..Default::default()
        };
        apply_plan(&conn, doc_id, &swap, 100, None, "t2").unwrap();
        let after = live_paragraphs(&conn, doc_id).unwrap();
        assert_eq!(after[0].text, "second");
        assert_eq!(after[1].text, "first");
    }

    #[test]
    fn test_insert_reuses_embedding_by_normalized_hash() {
        let (_dir, conn) = migrated_connection();
        let a = doc(&conn, "a.md");
        let b = doc(&conn, "b.md");
        let plan = ParagraphPlan {
            inserts: vec![new_paragraph(0, "shared")],
            ..Default::default()
        };
        apply_plan(&conn, a, &plan, 100, None, "t1").unwrap();
        conn.execute(
            "UPDATE paragraphs SET embedding = X'00000000', embedding_model = 'm1', needs_embedding = 0",
            [],
        )
        .unwrap();

        apply_plan(&conn, b, &plan, 100, Some("m1"), "t2").unwrap();
        let (needs, model): (bool, Option<String>) = conn
            .query_row(
                "SELECT needs_embedding, embedding_model FROM paragraphs WHERE doc_id = ?1",
                params![b],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert!(!needs);
        assert_eq!(model.as_deref(), Some("m1"));

        // a different model does not qualify
        assert!(find_embedding(&conn, "n-shared", Some("m2")).unwrap().is_none());
    }

    #[test]
    fn test_deletes_are_soft() {
        let (_dir, conn) = migrated_connection();
        let doc_id = doc(&conn, "a.md");
        let plan = ParagraphPlan {
            inserts: vec![new_paragraph(0, "gone")],
            ..Default::default()
        };
        apply_plan(&conn, doc_id, &plan, 100, None, "t1").unwrap();
        let id = live_paragraphs(&conn, doc_id).unwrap()[0].id;

        let delete = ParagraphPlan { deletes: vec![id], ..Default::default() };
        apply_plan(&conn, doc_id, &delete, 100, None, "t2").unwrap();
        assert!(live_paragraphs(&conn, doc_id).unwrap().is_empty());
        assert_eq!(paragraphs_deleted_at(&conn, doc_id, "t2").unwrap().len(), 1);
        assert_eq!(purge_deleted_before(&conn, "t3").unwrap(), 1);
    }
}
