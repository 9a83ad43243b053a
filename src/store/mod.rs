//! Paragraph store: documents, paragraphs, failure log and redirects in SQLite.
//!
//! Every document change is written by [`Store::commit`] in a single immediate
//! transaction, so a failed ingestion never leaves partial state behind.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, TransactionBehavior};
use serde::Serialize;

use crate::db::Db;
use crate::error::{Result, SifterError};
use crate::ingest::metadata::canonical_url;

pub mod documents;
pub mod failures;
pub mod paragraphs;
pub mod redirects;

pub use documents::{DocumentFields, DocumentRecord};
pub use failures::DocumentFailure;
pub use paragraphs::{NewParagraph, ParagraphPlan, ParagraphRecord, ParagraphUpdate};

/// Timestamps are stored as fixed-width UTC RFC 3339 so they compare as text.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One document write
#[derive(Debug, Clone)]
pub struct DocumentCommit {
    /// The stored document this file resolved to, live or tombstoned.
    pub previous: Option<DocumentRecord>,
    pub fields: DocumentFields,
    /// Slug derived from the title; suffixed on conflict.
    pub slug_base: String,
    /// `None` leaves paragraphs untouched and flags them for re-sync.
    pub paragraphs: Option<ParagraphPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitResult {
    pub doc_id: i64,
    pub slug: String,
    pub paragraph_count: i64,
    pub restored: bool,
    pub redirect: Option<(String, String)>,
    pub inserted: usize,
    pub reused: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub documents: usize,
    pub paragraphs: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: i64,
    pub deleted_documents: i64,
    pub paragraphs: i64,
    pub needs_embedding: i64,
    pub needs_sync: i64,
    pub failures: i64,
    pub redirects: i64,
}

/// A paragraph the search index has not seen in its current state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncItem {
    pub id: i64,
    pub doc_id: i64,
    /// Tombstoned paragraphs must be removed from the index.
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct Store {
    db: Db,
    batch_size: usize,
    embedding_model: Option<String>,
}

impl Store {
    pub fn new(db: Db, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
            embedding_model: None,
        }
    }

    /// Only reuse stored embeddings produced by `model` when inserting paragraphs
    pub fn with_embedding_model(mut self, model: Option<String>) -> Self {
        self.embedding_model = model;
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub async fn document(&self, id: i64) -> Result<Option<DocumentRecord>> {
        self.db.with_connection(move |conn| documents::find_by_id(conn, id)).await
    }

    pub async fn document_by_path(&self, path: &str) -> Result<Option<DocumentRecord>> {
        let path = path.to_string();
        self.db
            .with_connection(move |conn| documents::find_live_by_path(conn, &path))
            .await
    }

    pub async fn paragraphs(&self, doc_id: i64) -> Result<Vec<ParagraphRecord>> {
        self.db
            .with_connection(move |conn| paragraphs::live_paragraphs(conn, doc_id))
            .await
    }

    /// Paragraphs a new version of `doc` is diffed against: the live ones, or for a
    /// tombstone the ones deleted together with it.
    pub async fn existing_paragraphs(&self, doc: &DocumentRecord) -> Result<Vec<ParagraphRecord>> {
        let id = doc.id;
        let deleted_at = doc.deleted_at.clone();
        self.db
            .with_connection(move |conn| match deleted_at {
                Some(at) => paragraphs::paragraphs_deleted_at(conn, id, &at),
                None => paragraphs::live_paragraphs(conn, id),
            })
            .await
    }

    /// Write one document change atomically: slug, document row, tombstone restore,
    /// paragraph plan, redirect and failure-log cleanup.
    pub async fn commit(&self, commit: DocumentCommit) -> Result<CommitResult> {
        let batch_size = self.batch_size;
        let model = self.embedding_model.clone();

        self.db
            .with_connection(move |conn| {
                let now = timestamp(Utc::now());
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let previous = commit.previous.as_ref();
                let fields = &commit.fields;

                // the plan was built against `previous`; a row that moved on since is retried
                if let Some(doc) = previous {
                    if documents::find_by_id(&tx, doc.id)?.as_ref() != Some(doc) {
                        return Err(SifterError::Conflict(format!(
                            "document {} changed while {} was being ingested",
                            doc.id, fields.file_path
                        )));
                    }
                }

                let previous_id = previous.map(|d| d.id);
                let purged = documents::purge_tombstones_at(&tx, &fields.file_path, previous_id)?;
                if purged > 0 {
                    log::debug!("Purged {} tombstone(s) at {}", purged, fields.file_path);
                }
                if let Some(id) = previous_id {
                    if let Some(replaced) = documents::displace_live_at(&tx, &fields.file_path, id)? {
                        log::info!("Document {} replaces document {} at {}", id, replaced, fields.file_path);
                    }
                }

                let slug = documents::allocate_slug(
                    &tx,
                    fields.religion.as_deref(),
                    &fields.collection,
                    &commit.slug_base,
                    previous.map(|d| d.slug.as_str()),
                    previous_id,
                )?;

                let doc_id = match previous_id {
                    Some(id) => {
                        documents::update_document(&tx, id, fields, &slug, &now)?;
                        id
                    }
                    None => documents::insert_document(&tx, fields, &slug, &now)?,
                };

                // the row is live again with its new slug; revive its paragraphs before the plan runs
                let restored = match previous {
                    Some(doc) if doc.is_deleted() => {
                        let revived = documents::restore(&tx, doc, &now)?;
                        log::info!("Restored document {} ({} paragraphs)", doc.id, revived);
                        true
                    }
                    _ => false,
                };

                let (mut inserted, mut reused, mut deleted) = (0, 0, 0);
                match &commit.paragraphs {
                    Some(plan) => {
                        paragraphs::apply_plan(&tx, doc_id, plan, batch_size, model.as_deref(), &now)?;
                        inserted = plan.inserts.len();
                        reused = plan.reused();
                        deleted = plan.deletes.len();
                    }
                    None => {
                        paragraphs::mark_document_for_sync(&tx, doc_id)?;
                    }
                }
                let paragraph_count = documents::set_paragraph_count(&tx, doc_id)?;

                let new_url = canonical_url(fields.religion.as_deref(), &fields.collection, &slug);
                let old_url = previous.and_then(|d| canonical_url(d.religion.as_deref(), &d.collection, &d.slug));
                let redirect = match (old_url, new_url) {
                    (Some(old), Some(new)) if old != new => {
                        redirects::upsert_redirect(&tx, &old, &new, doc_id, &now)?;
                        Some((old, new))
                    }
                    _ => None,
                };

                failures::clear_failures(&tx, &fields.file_path)?;
                tx.commit()?;

                Ok(CommitResult {
                    doc_id,
                    slug,
                    paragraph_count,
                    restored,
                    redirect,
                    inserted,
                    reused,
                    deleted,
                })
            })
            .await
    }

    /// Tombstone a live document. Returns false when it was not live.
    pub async fn soft_delete(&self, doc_id: i64) -> Result<bool> {
        self.db
            .with_connection(move |conn| {
                let now = timestamp(Utc::now());
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let live = documents::find_by_id(&tx, doc_id)?.is_some_and(|d| !d.is_deleted());
                if live {
                    let paragraphs = documents::soft_delete(&tx, doc_id, &now)?;
                    log::info!("Soft-deleted document {} ({} paragraphs)", doc_id, paragraphs);
                }
                tx.commit()?;
                Ok(live)
            })
            .await
    }

    pub async fn record_failure(
        &self,
        path: &str,
        error_type: &str,
        message: &str,
        details: serde_json::Value,
    ) -> Result<i64> {
        let path = path.to_string();
        let error_type = error_type.to_string();
        let message = message.to_string();
        self.db
            .with_connection(move |conn| {
                let now = timestamp(Utc::now());
                failures::record_failure(conn, &path, &error_type, &message, &details, &now)
            })
            .await
    }

    pub async fn list_failures(&self) -> Result<Vec<DocumentFailure>> {
        self.db.with_connection(|conn| failures::list_failures(conn)).await
    }

    pub async fn live_paths(&self) -> Result<Vec<(i64, String)>> {
        self.db.with_connection(|conn| documents::live_paths(conn)).await
    }

    pub async fn resolve_redirect(&self, url: &str) -> Result<Option<String>> {
        let url = url.to_string();
        self.db
            .with_connection(move |conn| redirects::resolve_redirect(conn, &url))
            .await
    }

    /// Hard-delete documents and paragraphs tombstoned before `cutoff`
    pub async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let cutoff = timestamp(cutoff);
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let documents = documents::purge_deleted_before(&tx, &cutoff)?;
                let paragraphs = paragraphs::purge_deleted_before(&tx, &cutoff)?;
                tx.commit()?;
                Ok(PurgeReport { documents, paragraphs })
            })
            .await
    }

    /// Paragraphs (live or tombstoned) waiting for the search sink
    pub async fn paragraphs_needing_sync(&self, limit: usize) -> Result<Vec<SyncItem>> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, doc_id, deleted_at IS NOT NULL FROM paragraphs
                     WHERE needs_sync = 1 ORDER BY id LIMIT ?1",
                )?;
                let items = stmt
                    .query_map(params![limit as i64], |row| {
                        Ok(SyncItem {
                            id: row.get(0)?,
                            doc_id: row.get(1)?,
                            deleted: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(items)
            })
            .await
    }

    pub async fn mark_synced(&self, ids: Vec<i64>) -> Result<usize> {
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let mut updated = 0;
                {
                    let mut stmt = tx.prepare_cached("UPDATE paragraphs SET needs_sync = 0 WHERE id = ?1")?;
                    for id in &ids {
                        updated += stmt.execute(params![id])?;
                    }
                }
                tx.commit()?;
                Ok(updated)
            })
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.db
            .with_connection(|conn| {
                let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };
                Ok(StoreStats {
                    documents: count("SELECT COUNT(*) FROM documents WHERE deleted_at IS NULL")?,
                    deleted_documents: count("SELECT COUNT(*) FROM documents WHERE deleted_at IS NOT NULL")?,
                    paragraphs: count("SELECT COUNT(*) FROM paragraphs WHERE deleted_at IS NULL")?,
                    needs_embedding: count(
                        "SELECT COUNT(*) FROM paragraphs WHERE needs_embedding = 1 AND deleted_at IS NULL",
                    )?,
                    needs_sync: count("SELECT COUNT(*) FROM paragraphs WHERE needs_sync = 1")?,
                    failures: count("SELECT COUNT(*) FROM document_failures")?,
                    redirects: count("SELECT COUNT(*) FROM redirects")?,
                })
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::TempDir;

    /// Connection to a fresh database with all migrations applied
    pub(crate) fn migrated_connection() -> (TempDir, Connection) {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        crate::db::migrate::run_migrations(&mut conn, &migrations).unwrap();
        (temp_dir, conn)
    }

    /// Migrated store backed by a temporary database
    pub(crate) async fn test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));
        db.migrate(&Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
            .await
            .unwrap();
        (temp_dir, Store::new(db, 100))
    }

    fn fields(path: &str, collection: &str) -> DocumentFields {
        DocumentFields {
            file_path: path.to_string(),
            title: "The Hidden Words".to_string(),
            author: None,
            religion: Some("Baha'i".to_string()),
            collection: vec![collection.to_string()],
            language: Some("en".to_string()),
            year: None,
            description: None,
            extra: serde_json::Map::new(),
            file_hash: "f".to_string(),
            body_hash: "b".to_string(),
            auto_segmented: Some(false),
        }
    }

    fn insert(text: &str, position: i64) -> NewParagraph {
        NewParagraph {
            position,
            text: text.to_string(),
            content_hash: format!("c{}", text),
            word_hash: format!("w{}", text),
            normalized_hash: format!("n{}", text),
            heading: None,
            block_type: "paragraph".to_string(),
        }
    }

    #[test]
    fn test_timestamp_is_fixed_width() {
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        assert_eq!(timestamp(at), "2026-01-02T03:04:05.000Z");
    }

    #[tokio::test]
    async fn test_commit_insert_then_move_writes_redirect() {
        let (_dir, store) = test_store().await;
        let first = store
            .commit(DocumentCommit {
                previous: None,
                fields: fields("Baha'i/Writings/hw.md", "Writings"),
                slug_base: "the-hidden-words".to_string(),
                paragraphs: Some(ParagraphPlan {
                    inserts: vec![insert("one", 0), insert("two", 1)],
                    ..Default::default()
                }),
            })
            .await
            .unwrap();
        assert_eq!(first.paragraph_count, 2);
        assert_eq!(first.inserted, 2);
        assert!(first.redirect.is_none());

        let previous = store.document(first.doc_id).await.unwrap();
        let moved = store
            .commit(DocumentCommit {
                previous,
                fields: fields("Baha'i/Prayers/hw.md", "Prayers"),
                slug_base: "the-hidden-words".to_string(),
                paragraphs: None,
            })
            .await
            .unwrap();
        assert_eq!(moved.doc_id, first.doc_id);
        assert_eq!(
            moved.redirect,
            Some((
                "/library/bahai/writings/the-hidden-words".to_string(),
                "/library/bahai/prayers/the-hidden-words".to_string()
            ))
        );
        assert_eq!(
            store.resolve_redirect("/library/bahai/writings/the-hidden-words").await.unwrap().as_deref(),
            Some("/library/bahai/prayers/the-hidden-words")
        );
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.paragraphs, 2);
        assert_eq!(stats.needs_sync, 2);
    }

    #[tokio::test]
    async fn test_sync_queue_and_purge() {
        let (_dir, store) = test_store().await;
        let result = store
            .commit(DocumentCommit {
                previous: None,
                fields: fields("a.md", "Writings"),
                slug_base: "a".to_string(),
                paragraphs: Some(ParagraphPlan { inserts: vec![insert("x", 0)], ..Default::default() }),
            })
            .await
            .unwrap();

        let pending = store.paragraphs_needing_sync(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(!pending[0].deleted);
        store.mark_synced(pending.iter().map(|p| p.id).collect()).await.unwrap();
        assert!(store.paragraphs_needing_sync(10).await.unwrap().is_empty());

        assert!(store.soft_delete(result.doc_id).await.unwrap());
        assert!(!store.soft_delete(result.doc_id).await.unwrap());
        let pending = store.paragraphs_needing_sync(10).await.unwrap();
        assert!(pending[0].deleted);

        let report = store.purge_deleted_before(Utc::now() + chrono::Duration::days(1)).await.unwrap();
        assert_eq!(report.documents, 1);
        assert!(store.document(result.doc_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_snapshot() {
        let (_dir, store) = test_store().await;
        let first = store
            .commit(DocumentCommit {
                previous: None,
                fields: fields("Baha'i/Writings/hw.md", "Writings"),
                slug_base: "the-hidden-words".to_string(),
                paragraphs: Some(ParagraphPlan { inserts: vec![insert("one", 0)], ..Default::default() }),
            })
            .await
            .unwrap();
        let snapshot = store.document(first.doc_id).await.unwrap();

        // removed between lookup and commit
        assert!(store.soft_delete(first.doc_id).await.unwrap());
        let err = store
            .commit(DocumentCommit {
                previous: snapshot,
                fields: fields("Baha'i/Prayers/hw.md", "Prayers"),
                slug_base: "the-hidden-words".to_string(),
                paragraphs: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SifterError::Conflict(_)));

        let doc = store.document(first.doc_id).await.unwrap().unwrap();
        assert!(doc.is_deleted());
        assert_eq!(doc.file_path, "Baha'i/Writings/hw.md");
    }

    #[tokio::test]
    async fn test_move_onto_occupied_path_replaces_document() {
        let (_dir, store) = test_store().await;
        let mut occupant = fields("Baha'i/Writings/b.md", "Writings");
        occupant.title = "Beta".to_string();
        let b = store
            .commit(DocumentCommit {
                previous: None,
                fields: occupant,
                slug_base: "beta".to_string(),
                paragraphs: Some(ParagraphPlan { inserts: vec![insert("beta", 0)], ..Default::default() }),
            })
            .await
            .unwrap();
        let a = store
            .commit(DocumentCommit {
                previous: None,
                fields: fields("Baha'i/Writings/a.md", "Writings"),
                slug_base: "alpha".to_string(),
                paragraphs: Some(ParagraphPlan { inserts: vec![insert("alpha", 0)], ..Default::default() }),
            })
            .await
            .unwrap();

        let previous = store.document(a.doc_id).await.unwrap();
        let moved = store
            .commit(DocumentCommit {
                previous,
                fields: fields("Baha'i/Writings/b.md", "Writings"),
                slug_base: "alpha".to_string(),
                paragraphs: None,
            })
            .await
            .unwrap();
        assert_eq!(moved.doc_id, a.doc_id);

        let at_b = store.document_by_path("Baha'i/Writings/b.md").await.unwrap().unwrap();
        assert_eq!(at_b.id, a.doc_id);
        assert_eq!(at_b.title, "The Hidden Words");
        assert!(store.document(b.doc_id).await.unwrap().is_none());
        assert!(store.document_by_path("Baha'i/Writings/a.md").await.unwrap().is_none());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.paragraphs, 1);
    }
}
