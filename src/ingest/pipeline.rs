//! The ingestion orchestrator.
//!
//! One call takes a raw library file through frontmatter, hashing, change detection,
//! block parsing, segmentation, paragraph diff and sentence marking, then commits the
//! result in a single store transaction. Validation failures are logged to the failure
//! table and reported with [`IngestStatus::Error`]; they never touch stored state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::{Config, IngestConfig};
use crate::db::Db;
use crate::error::{Result, SifterError};
use crate::markers;
use crate::oracle::{self, MarkerOracle, MarkerRequest, SegmentationOracle};
use crate::segment::{detect_language, Segmenter};
use crate::store::{DocumentCommit, DocumentFields, NewParagraph, PurgeReport, Store};

use super::blocks::parse_document;
use super::diff::{diff_paragraphs, IncomingParagraph};
use super::frontmatter::{parse_frontmatter, resolve_metadata, split_frontmatter, DocumentMeta, Frontmatter};
use super::incremental::{classify, lookup, Classification, LookupKeys};
use super::metadata::{compute_body_hash, compute_file_hash, content_hash, slugify};
use super::walker::relative_path;

const PREVIEW_CHARS: usize = 200;
const COMMIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Unchanged,
    Ingested,
    Updated,
    MetadataUpdated,
    Moved,
    Restored,
    Removed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub path: String,
    pub status: IngestStatus,
    pub document_id: Option<i64>,
    pub slug: Option<String>,
    pub paragraphs_inserted: usize,
    pub paragraphs_reused: usize,
    pub paragraphs_deleted: usize,
    /// Live paragraphs after the ingest.
    pub paragraph_count: usize,
    pub error: Option<String>,
}

impl IngestReport {
    fn new(path: &str, status: IngestStatus) -> Self {
        Self {
            path: path.to_string(),
            status,
            document_id: None,
            slug: None,
            paragraphs_inserted: 0,
            paragraphs_reused: 0,
            paragraphs_deleted: 0,
            paragraph_count: 0,
            error: None,
        }
    }
}

/// One file to ingest
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Path relative to the library root.
    pub path: String,
    pub raw: String,
    /// Known document id, e.g. from a detected move.
    pub doc_id: Option<i64>,
    /// Run the full pipeline even when the file is unchanged.
    pub force: bool,
}

impl IngestRequest {
    pub fn new(path: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            raw: raw.into(),
            doc_id: None,
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// A validation failure, recorded in the failure log instead of being committed
#[derive(Debug)]
struct Rejection {
    kind: &'static str,
    message: String,
    details: serde_json::Value,
}

impl Rejection {
    fn oversized(index: usize, chars: usize, max: usize, text: &str) -> Self {
        Self {
            kind: "oversized_paragraph",
            message: format!("paragraph {} has {} characters (limit {})", index, chars, max),
            details: json!({
                "paragraph_index": index,
                "length": chars,
                "limit": max,
                "preview": text.chars().take(PREVIEW_CHARS).collect::<String>(),
            }),
        }
    }
}

type Validated<T> = std::result::Result<T, Rejection>;

pub struct Ingester {
    store: Store,
    segmenter: Segmenter,
    marker_oracle: Option<Arc<dyn MarkerOracle>>,
    settings: IngestConfig,
    retention: chrono::Duration,
    library_root: Option<PathBuf>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Ingester {
    pub fn new(store: Store, segmenter: Segmenter, settings: IngestConfig) -> Self {
        Self {
            store,
            segmenter,
            marker_oracle: None,
            settings,
            retention: chrono::Duration::days(30),
            library_root: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_marker_oracle(mut self, oracle: Option<Arc<dyn MarkerOracle>>) -> Self {
        self.marker_oracle = oracle;
        self
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Library directory used to tell a moved file from a copy: a hash match under
    /// another path only counts as a move when that file is gone.
    pub fn with_library_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.library_root = Some(root.into());
        self
    }

    /// Build the store, oracles and segmenter described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Store::new(Db::new(config.db_path()), config.ingest.statement_batch_size)
            .with_embedding_model(config.embeddings.as_ref().map(|e| e.model.clone()));

        let llm = config.oracle.as_ref().map(oracle::llm_oracle).transpose()?;
        let segmentation_oracle = llm.clone().map(|o| o as Arc<dyn SegmentationOracle>);
        let marker_oracle = match (&config.oracle, llm) {
            (Some(oracle_config), Some(o)) if oracle_config.add_markers => Some(o as Arc<dyn MarkerOracle>),
            _ => None,
        };
        if segmentation_oracle.is_none() {
            log::info!("No oracle configured; oversized blocks will be hard split");
        }

        Ok(Self::new(
            store,
            Segmenter::new(config.segmentation.clone(), segmentation_oracle),
            config.ingest.clone(),
        )
        .with_marker_oracle(marker_oracle)
        .with_retention(config.retention())
        .with_library_root(config.library_root()))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Lock every path in a fixed order so concurrent moves cannot deadlock
    async fn lock_paths(&self, paths: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted = paths.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            sorted
                .iter()
                .map(|p| locks.entry(p.to_string()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        guards
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        let _guards = self.lock_paths(&[request.path.as_str()]).await;
        self.ingest_locked(request).await
    }

    /// Read and ingest a file under `root`
    pub async fn ingest_file(&self, root: &Path, path: &Path, force: bool) -> Result<IngestReport> {
        let relative = relative_path(root, path)?;
        let raw = tokio::fs::read_to_string(path).await?;
        self.ingest(IngestRequest::new(relative, raw).force(force)).await
    }

    /// Ingest `request` as the new location of the document stored at `old_path`
    pub async fn move_document(&self, old_path: &str, request: IngestRequest) -> Result<IngestReport> {
        let _guards = self.lock_paths(&[old_path, request.path.as_str()]).await;
        let doc_id = self.store.document_by_path(old_path).await?.map(|d| d.id);
        let request = IngestRequest {
            doc_id: request.doc_id.or(doc_id),
            ..request
        };
        self.ingest_locked(request).await
    }

    /// Tombstone the live document at `path`
    pub async fn remove(&self, path: &str) -> Result<IngestReport> {
        let _guards = self.lock_paths(&[path]).await;
        let Some(doc) = self.store.document_by_path(path).await? else {
            log::debug!("Nothing stored at {}", path);
            return Ok(IngestReport::new(path, IngestStatus::Unchanged));
        };

        self.store.soft_delete(doc.id).await?;
        log::info!("Removed {} (document {})", path, doc.id);
        let mut report = IngestReport::new(path, IngestStatus::Removed);
        report.document_id = Some(doc.id);
        report.slug = Some(doc.slug);
        report.paragraphs_deleted = doc.paragraph_count.max(0) as usize;
        Ok(report)
    }

    /// Tombstone every live document whose path is not in `on_disk`
    pub async fn reconcile(&self, on_disk: &HashSet<String>) -> Result<Vec<IngestReport>> {
        let mut reports = Vec::new();
        for (_, path) in self.store.live_paths().await? {
            if on_disk.contains(&path) {
                continue;
            }
            let report = self.remove(&path).await?;
            if report.status == IngestStatus::Removed {
                reports.push(report);
            }
        }
        if !reports.is_empty() {
            log::info!("Reconciliation removed {} missing document(s)", reports.len());
        }
        Ok(reports)
    }

    /// Hard-delete tombstones older than the retention window
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let report = self.store.purge_deleted_before(now - self.retention).await?;
        if report.documents > 0 || report.paragraphs > 0 {
            log::info!(
                "Purged {} document(s) and {} paragraph(s) past retention",
                report.documents,
                report.paragraphs
            );
        }
        Ok(report)
    }

    async fn ingest_locked(&self, request: IngestRequest) -> Result<IngestReport> {
        let mut attempt = 1;
        loop {
            match self.process(&request).await {
                Ok(Ok(report)) => return Ok(report),
                Ok(Err(rejection)) => return self.reject(&request.path, rejection).await,
                Err(SifterError::Conflict(reason)) if attempt < COMMIT_ATTEMPTS => {
                    log::debug!("Retrying {}: {}", request.path, reason);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reject(&self, path: &str, rejection: Rejection) -> Result<IngestReport> {
        log::warn!("Rejected {} ({}): {}", path, rejection.kind, rejection.message);
        self.store
            .record_failure(path, rejection.kind, &rejection.message, rejection.details)
            .await?;
        let mut report = IngestReport::new(path, IngestStatus::Error);
        report.error = Some(SifterError::rejected(rejection.kind, rejection.message).to_string());
        Ok(report)
    }

    async fn process(&self, request: &IngestRequest) -> Result<Validated<IngestReport>> {
        let file_hash = compute_file_hash(&request.raw);
        let (yaml, body) = split_frontmatter(&request.raw);

        let meta = match read_metadata(&request.path, yaml) {
            Ok(meta) => meta,
            Err(rejection) => return Ok(Err(rejection)),
        };
        if !meta.has_taxonomy() {
            return Ok(Err(Rejection {
                kind: "missing_taxonomy",
                message: "document has no religion or collection".to_string(),
                details: json!({ "religion": meta.religion, "collection": meta.collection }),
            }));
        }

        let keys = LookupKeys {
            doc_id: request.doc_id,
            path: request.path.clone(),
            file_hash,
            body_hash: compute_body_hash(body),
        };
        let existing = lookup(&self.store, keys.clone(), self.library_root.clone()).await?;
        let classification = classify(existing.as_ref().map(|e| &e.record), &keys, request.force);

        if classification == Classification::Unchanged {
            log::debug!("Unchanged: {}", request.path);
            let mut report = IngestReport::new(&request.path, IngestStatus::Unchanged);
            if let Some(existing) = existing {
                report.document_id = Some(existing.record.id);
                report.slug = Some(existing.record.slug);
                report.paragraph_count = existing.record.paragraph_count.max(0) as usize;
            }
            return Ok(Ok(report));
        }

        let previous = existing.map(|e| e.record);
        let moved = previous.as_ref().is_some_and(|d| d.file_path != request.path);
        let mut fields = document_fields(&request.path, &meta, keys.file_hash, keys.body_hash);

        let paragraphs = if classification.needs_segmentation() {
            let extension = extension_of(&request.path);
            let (incoming, auto_segmented) = match self.build_paragraphs(body, extension, &meta).await {
                Ok(built) => built,
                Err(rejection) => return Ok(Err(rejection)),
            };
            fields.auto_segmented = Some(auto_segmented);

            let stored = match &previous {
                Some(doc) => self.store.existing_paragraphs(doc).await?,
                None => Vec::new(),
            };
            let mut plan = diff_paragraphs(&stored, &incoming);
            self.apply_markers(&mut plan.inserts, meta.language.as_deref()).await;
            Some(plan)
        } else {
            None
        };

        let result = self
            .store
            .commit(DocumentCommit {
                previous,
                fields,
                slug_base: slugify(&meta.title),
                paragraphs,
            })
            .await?;

        let status = match classification {
            _ if result.restored => IngestStatus::Restored,
            Classification::New => IngestStatus::Ingested,
            Classification::MovedOnly => IngestStatus::Moved,
            _ if moved => IngestStatus::Moved,
            Classification::MetadataOnly => IngestStatus::MetadataUpdated,
            Classification::ContentChanged => IngestStatus::Updated,
            Classification::Unchanged => IngestStatus::Unchanged,
        };
        log::info!(
            "{:?}: {} (document {}, {} inserted, {} reused, {} deleted)",
            status,
            request.path,
            result.doc_id,
            result.inserted,
            result.reused,
            result.deleted
        );
        if let Some((old, new)) = &result.redirect {
            log::info!("Redirect {} -> {}", old, new);
        }

        let mut report = IngestReport::new(&request.path, status);
        report.document_id = Some(result.doc_id);
        report.slug = Some(result.slug);
        report.paragraphs_inserted = result.inserted;
        report.paragraphs_reused = result.reused;
        report.paragraphs_deleted = result.deleted;
        report.paragraph_count = result.paragraph_count.max(0) as usize;
        Ok(Ok(report))
    }

    /// Parse blocks and segment the oversized ones. Returns the paragraphs and whether
    /// AI segmentation split anything.
    async fn build_paragraphs(
        &self,
        body: &str,
        extension: &str,
        meta: &DocumentMeta,
    ) -> Validated<(Vec<IncomingParagraph>, bool)> {
        let config = self.segmenter.config();
        let max = config.max_paragraph_chars;
        let language = meta.language.clone().or_else(|| detect_language(body).code);
        let ai_segmentation = meta
            .auto_segment
            .unwrap_or_else(|| language.as_deref().is_some_and(|l| config.requires_ai_segmentation(l)));

        let mut paragraphs = Vec::new();
        let mut split_any = false;
        for (index, block) in parse_document(body, extension, config.min_block_chars).into_iter().enumerate() {
            let block_type = block.block_type.as_str().to_string();
            let chars = block.content.chars().count();
            if chars <= max {
                paragraphs.push(IncomingParagraph {
                    text: block.content,
                    heading: block.heading,
                    block_type,
                });
                continue;
            }
            if !ai_segmentation {
                return Err(Rejection::oversized(index, chars, max, &block.content));
            }

            let outcome = self.segmenter.segment(&block.content, language.as_deref()).await;
            split_any |= outcome.segments.len() > 1;
            log::debug!("Block {} split into {} segments", index, outcome.segments.len());
            for segment in outcome.segments {
                paragraphs.push(IncomingParagraph {
                    text: segment.text,
                    heading: block.heading.clone(),
                    block_type: block_type.clone(),
                });
            }
        }
        Ok((paragraphs, ai_segmentation && split_any))
    }

    /// Add sentence markers to new paragraphs. Replies that do not strip back to the
    /// original text are discarded and the paragraph stays unmarked.
    async fn apply_markers(&self, inserts: &mut [NewParagraph], language: Option<&str>) {
        let Some(oracle) = &self.marker_oracle else {
            return;
        };
        let pending: Vec<usize> = inserts
            .iter()
            .enumerate()
            .filter(|(_, p)| !markers::contains_markers(&p.text))
            .map(|(i, _)| i)
            .collect();

        for batch in pending.chunks(self.settings.marker_batch_size.max(1)) {
            let requests: Vec<MarkerRequest> = batch
                .iter()
                .map(|&i| MarkerRequest {
                    id: i,
                    text: inserts[i].text.clone(),
                })
                .collect();

            let marked = match oracle.add_sentence_markers(&requests, language).await {
                Ok(marked) => marked,
                Err(e) => {
                    log::warn!("Sentence marking failed, leaving {} paragraph(s) unmarked: {}", batch.len(), e);
                    continue;
                }
            };

            for result in marked {
                if !batch.contains(&result.id) {
                    log::debug!("Ignoring marker reply for unknown paragraph {}", result.id);
                    continue;
                }
                let paragraph = &mut inserts[result.id];
                if let Err(e) = markers::verify_round_trip(&paragraph.text, &result.marked_text).into_result() {
                    log::warn!("Discarding markers for paragraph {}: {}", paragraph.position, e);
                    continue;
                }
                paragraph.text = result.marked_text;
                paragraph.content_hash = content_hash(&paragraph.text);
            }
        }
    }
}

fn read_metadata(path: &str, yaml: Option<&str>) -> Validated<DocumentMeta> {
    let invalid = |e: SifterError| Rejection {
        kind: "invalid_frontmatter",
        message: e.to_string(),
        details: json!({}),
    };
    let frontmatter = match yaml {
        Some(yaml) => parse_frontmatter(yaml).map_err(invalid)?,
        None => Frontmatter::default(),
    };
    resolve_metadata(path, frontmatter).map_err(invalid)
}

fn document_fields(path: &str, meta: &DocumentMeta, file_hash: String, body_hash: String) -> DocumentFields {
    DocumentFields {
        file_path: path.to_string(),
        title: meta.title.clone(),
        author: meta.author.clone(),
        religion: meta.religion.clone(),
        collection: meta.collection.clone(),
        language: meta.language.clone(),
        year: meta.year.clone(),
        description: meta.description.clone(),
        extra: meta.extra.clone(),
        file_hash,
        body_hash,
        auto_segmented: None,
    }
}

fn extension_of(path: &str) -> &str {
    path.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.contains('/'))
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentationConfig;
    use crate::markers::MarkerKind;
    use crate::oracle::MarkedParagraph;
    use crate::store::tests::test_store;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    const PATH: &str = "Baha'i/Writings/hidden-words.md";
    const HIDDEN_WORDS: &str = "---\ntitle: The Hidden Words\nlanguage: en\n---\n# Part One\n\n\
        O Son of Spirit! My first counsel is this.\n\n\
        O Son of Spirit! The best beloved of all things in My sight is Justice.\n";

    /// Marks every paragraph as one sentence
    struct WholeSentenceMarker;

    #[async_trait]
    impl MarkerOracle for WholeSentenceMarker {
        async fn add_sentence_markers(
            &self,
            paragraphs: &[MarkerRequest],
            _language: Option<&str>,
        ) -> Result<Vec<MarkedParagraph>> {
            Ok(paragraphs
                .iter()
                .map(|p| MarkedParagraph {
                    id: p.id,
                    marked_text: markers::wrap(&p.text, MarkerKind::Sentence, 1),
                    sentence_count: 1,
                })
                .collect())
        }
    }

    /// Rewrites the text while marking it
    struct CorruptingMarker;

    #[async_trait]
    impl MarkerOracle for CorruptingMarker {
        async fn add_sentence_markers(
            &self,
            paragraphs: &[MarkerRequest],
            _language: Option<&str>,
        ) -> Result<Vec<MarkedParagraph>> {
            Ok(paragraphs
                .iter()
                .map(|p| MarkedParagraph {
                    id: p.id,
                    marked_text: markers::wrap(&p.text.to_uppercase(), MarkerKind::Sentence, 1),
                    sentence_count: 1,
                })
                .collect())
        }
    }

    async fn ingester(marker: Option<Arc<dyn MarkerOracle>>) -> (TempDir, Ingester) {
        let (dir, store) = test_store().await;
        let config = SegmentationConfig {
            max_paragraph_chars: 200,
            target_chunk_chars: 100,
            ..Default::default()
        };
        let ingester = Ingester::new(store, Segmenter::new(config, None), IngestConfig::default())
            .with_marker_oracle(marker);
        (dir, ingester)
    }

    async fn paragraph_ids(ingester: &Ingester, doc_id: i64) -> Vec<i64> {
        ingester
            .store()
            .paragraphs(doc_id)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect()
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let (_dir, ingester) = ingester(None).await;

        let first = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        assert_eq!(first.status, IngestStatus::Ingested);
        assert_eq!(first.paragraphs_inserted, 3);
        assert_eq!(first.paragraph_count, 3);
        assert_eq!(first.slug.as_deref(), Some("the-hidden-words"));
        let doc_id = first.document_id.unwrap();
        let ids = paragraph_ids(&ingester, doc_id).await;

        let second = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        assert_eq!(second.status, IngestStatus::Unchanged);
        assert_eq!(second.document_id, Some(doc_id));
        assert_eq!(second.paragraphs_inserted + second.paragraphs_deleted, 0);
        assert_eq!(second.paragraph_count, 3);
        assert_eq!(paragraph_ids(&ingester, doc_id).await, ids);
    }

    #[tokio::test]
    async fn test_copied_file_gets_its_own_document() {
        let library = TempDir::new().unwrap();
        let (_dir, ingester) = ingester(None).await;
        let ingester = ingester.with_library_root(library.path());
        let copy = "Baha'i/Writings/hidden-words-copy.md";
        fs::create_dir_all(library.path().join("Baha'i/Writings")).unwrap();
        fs::write(library.path().join(PATH), HIDDEN_WORDS).unwrap();
        fs::write(library.path().join(copy), HIDDEN_WORDS).unwrap();

        let a = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let b = ingester.ingest(IngestRequest::new(copy, HIDDEN_WORDS)).await.unwrap();
        assert_eq!(a.status, IngestStatus::Ingested);
        assert_eq!(b.status, IngestStatus::Ingested);
        assert_ne!(a.document_id, b.document_id);
        assert_eq!(b.slug.as_deref(), Some("the-hidden-words-2"));

        let a2 = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let b2 = ingester.ingest(IngestRequest::new(copy, HIDDEN_WORDS)).await.unwrap();
        assert_eq!(a2.status, IngestStatus::Unchanged);
        assert_eq!(b2.status, IngestStatus::Unchanged);
        let stats = ingester.store().stats().await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.redirects, 0);
    }

    #[tokio::test]
    async fn test_concurrent_ingest_of_one_path_is_serialized() {
        let (_dir, ingester) = ingester(None).await;
        let request = IngestRequest::new(PATH, HIDDEN_WORDS);

        let (a, b) = tokio::join!(ingester.ingest(request.clone()), ingester.ingest(request));
        let mut statuses = vec![a.unwrap().status, b.unwrap().status];
        statuses.sort_by_key(|s| format!("{:?}", s));
        assert_eq!(statuses, vec![IngestStatus::Ingested, IngestStatus::Unchanged]);
        assert_eq!(ingester.store().stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_word_hash_reuse_keeps_ids_and_embeddings() {
        let (_dir, ingester) = ingester(Some(Arc::new(WholeSentenceMarker))).await;
        let first = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let doc_id = first.document_id.unwrap();

        let stored = ingester.store().paragraphs(doc_id).await.unwrap();
        assert!(stored.iter().all(|p| markers::contains_markers(&p.text)));
        ingester
            .store()
            .db()
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE paragraphs SET embedding = x'0000803f', embedding_model = 'm', needs_embedding = 0",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        // rewrapped lines and a new paragraph in the middle
        let edited = "---\ntitle: The Hidden Words\nlanguage: en\n---\n# Part One\n\n\
            O Son of Spirit!\nMy first counsel is this.\n\n\
            A new paragraph appears here.\n\n\
            O Son of Spirit! The best beloved of all things in My sight is Justice.\n";
        let second = ingester.ingest(IngestRequest::new(PATH, edited)).await.unwrap();
        assert_eq!(second.status, IngestStatus::Updated);
        assert_eq!(second.document_id, Some(doc_id));
        assert_eq!(second.paragraphs_inserted, 1);
        assert_eq!(second.paragraphs_reused, 3);
        assert_eq!(second.paragraphs_deleted, 0);

        let after = ingester.store().paragraphs(doc_id).await.unwrap();
        assert_eq!(after.len(), 4);
        for old in &stored {
            let kept = after.iter().find(|p| p.id == old.id).unwrap();
            assert_eq!(kept.text, old.text);
            assert!(kept.has_embedding);
        }
        let positions: Vec<i64> = after.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert!(after[2].text.contains("A new paragraph"));
        assert!(markers::contains_markers(&after[2].text));
        assert!(!after[2].has_embedding);
    }

    #[tokio::test]
    async fn test_markers_failing_round_trip_are_discarded() {
        let (_dir, ingester) = ingester(Some(Arc::new(CorruptingMarker))).await;
        let report = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let paragraphs = ingester.store().paragraphs(report.document_id.unwrap()).await.unwrap();
        assert!(paragraphs.iter().all(|p| !markers::contains_markers(&p.text)));
        assert!(paragraphs.iter().any(|p| p.text.starts_with("O Son of Spirit!")));
    }

    #[tokio::test]
    async fn test_oversized_paragraph_rejected() {
        let (_dir, ingester) = ingester(None).await;
        let long = "word ".repeat(100);
        let raw = format!("---\nlanguage: en\n---\nShort one.\n\n{}\n", long);

        let report = ingester.ingest(IngestRequest::new(PATH, raw)).await.unwrap();
        assert_eq!(report.status, IngestStatus::Error);
        assert!(report.error.unwrap().contains("oversized_paragraph"));
        assert!(ingester.store().document_by_path(PATH).await.unwrap().is_none());
        assert_eq!(ingester.store().stats().await.unwrap().paragraphs, 0);

        let failures = ingester.store().list_failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_type, "oversized_paragraph");
        assert_eq!(failures[0].details["paragraph_index"], 1);
        assert!(failures[0].details["preview"].as_str().unwrap().chars().count() <= PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn test_failures_cleared_after_successful_ingest() {
        let (_dir, ingester) = ingester(None).await;
        let raw = format!("{}\n", "word ".repeat(100));
        ingester.ingest(IngestRequest::new(PATH, raw)).await.unwrap();
        assert_eq!(ingester.store().list_failures().await.unwrap().len(), 1);

        ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        assert!(ingester.store().list_failures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ai_language_oversized_block_is_segmented() {
        let (_dir, ingester) = ingester(None).await;
        let verse = "بسم الله الرحمن الرحيم الحمد لله رب العالمين. ";
        let raw = format!("---\nlanguage: ar\n---\n{}\n", verse.repeat(12));
        let path = "Islam/Quran/fatiha.md";

        let report = ingester.ingest(IngestRequest::new(path, raw)).await.unwrap();
        assert_eq!(report.status, IngestStatus::Ingested);
        let doc_id = report.document_id.unwrap();
        let paragraphs = ingester.store().paragraphs(doc_id).await.unwrap();
        assert!(paragraphs.len() > 1);
        assert!(paragraphs.iter().all(|p| p.text.chars().count() <= 200));
        assert!(ingester.store().document(doc_id).await.unwrap().unwrap().auto_segmented);
    }

    #[tokio::test]
    async fn test_missing_taxonomy_and_bad_frontmatter_rejected() {
        let (_dir, ingester) = ingester(None).await;

        let report = ingester.ingest(IngestRequest::new("loose.md", "Some text.\n")).await.unwrap();
        assert_eq!(report.status, IngestStatus::Error);

        let broken = "---\ntitle: [unclosed\n---\nSome text.\n";
        let report = ingester.ingest(IngestRequest::new(PATH, broken)).await.unwrap();
        assert_eq!(report.status, IngestStatus::Error);

        let kinds: Vec<String> = ingester
            .store()
            .list_failures()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.error_type)
            .collect();
        assert!(kinds.contains(&"missing_taxonomy".to_string()));
        assert!(kinds.contains(&"invalid_frontmatter".to_string()));
    }

    #[tokio::test]
    async fn test_slug_conflict_gets_suffix() {
        let (_dir, ingester) = ingester(None).await;
        let other = "---\ntitle: The Hidden Words\n---\nA different translation of the text.\n";

        let a = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let b = ingester
            .ingest(IngestRequest::new("Baha'i/Writings/hidden-words-alt.md", other))
            .await
            .unwrap();
        assert_eq!(a.slug.as_deref(), Some("the-hidden-words"));
        assert_eq!(b.slug.as_deref(), Some("the-hidden-words-2"));
    }

    #[tokio::test]
    async fn test_tombstone_restore_keeps_id() {
        let (_dir, ingester) = ingester(None).await;
        let first = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let doc_id = first.document_id.unwrap();
        let ids = paragraph_ids(&ingester, doc_id).await;

        let removed = ingester.remove(PATH).await.unwrap();
        assert_eq!(removed.status, IngestStatus::Removed);
        assert!(ingester.store().paragraphs(doc_id).await.unwrap().is_empty());

        let restored = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        assert_eq!(restored.status, IngestStatus::Restored);
        assert_eq!(restored.document_id, Some(doc_id));
        assert_eq!(paragraph_ids(&ingester, doc_id).await, ids);
    }

    #[tokio::test]
    async fn test_metadata_only_update_keeps_paragraphs_and_redirects() {
        let (_dir, ingester) = ingester(None).await;
        let first = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let doc_id = first.document_id.unwrap();
        let ids = paragraph_ids(&ingester, doc_id).await;

        let retitled = HIDDEN_WORDS.replace("title: The Hidden Words", "title: The Hidden Words of Bahá'u'lláh");
        let report = ingester.ingest(IngestRequest::new(PATH, retitled)).await.unwrap();
        assert_eq!(report.status, IngestStatus::MetadataUpdated);
        assert_eq!(report.slug.as_deref(), Some("the-hidden-words-of-bahaullah"));
        assert_eq!(paragraph_ids(&ingester, doc_id).await, ids);
        assert_eq!(
            ingester
                .store()
                .resolve_redirect("/library/bahai/writings/the-hidden-words")
                .await
                .unwrap()
                .as_deref(),
            Some("/library/bahai/writings/the-hidden-words-of-bahaullah")
        );
    }

    #[tokio::test]
    async fn test_move_keeps_document() {
        // empty library: the stored paths no longer exist on disk
        let library = TempDir::new().unwrap();
        let (_dir, ingester) = ingester(None).await;
        let ingester = ingester.with_library_root(library.path());
        let first = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let doc_id = first.document_id.unwrap();

        let new_path = "Baha'i/Prayers/hidden-words.md";
        let moved = ingester
            .move_document(PATH, IngestRequest::new(new_path, HIDDEN_WORDS))
            .await
            .unwrap();
        assert_eq!(moved.status, IngestStatus::Moved);
        assert_eq!(moved.document_id, Some(doc_id));
        assert!(ingester.store().document_by_path(PATH).await.unwrap().is_none());
        assert_eq!(
            ingester.store().document(doc_id).await.unwrap().unwrap().collection,
            vec!["Prayers".to_string()]
        );

        // an identical file showing up elsewhere is detected by its hash
        let renamed = ingester
            .ingest(IngestRequest::new("Baha'i/Tablets/hidden-words.md", HIDDEN_WORDS))
            .await
            .unwrap();
        assert_eq!(renamed.status, IngestStatus::Moved);
        assert_eq!(renamed.document_id, Some(doc_id));
        assert_eq!(ingester.store().stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_move_onto_existing_file_replaces_it() {
        let (_dir, ingester) = ingester(None).await;
        let alpha = "---\ntitle: Alpha\n---\nThe first tablet.\n";
        let beta = "---\ntitle: Beta\n---\nThe second tablet.\n";
        let from = "Baha'i/Tablets/alpha.md";
        let to = "Baha'i/Tablets/beta.md";
        let a = ingester.ingest(IngestRequest::new(from, alpha)).await.unwrap();
        let b = ingester.ingest(IngestRequest::new(to, beta)).await.unwrap();

        let moved = ingester.move_document(from, IngestRequest::new(to, alpha)).await.unwrap();
        assert_eq!(moved.status, IngestStatus::Moved);
        assert_eq!(moved.document_id, a.document_id);

        let store = ingester.store();
        let at_target = store.document_by_path(to).await.unwrap().unwrap();
        assert_eq!(Some(at_target.id), a.document_id);
        assert_eq!(at_target.title, "Alpha");
        assert!(store.document_by_path(from).await.unwrap().is_none());
        assert!(store.document(b.document_id.unwrap()).await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().documents, 1);
    }

    /// Removes a document the moment marking starts, once armed
    struct RemovingMarker {
        store: Store,
        target: Mutex<Option<i64>>,
    }

    #[async_trait]
    impl MarkerOracle for RemovingMarker {
        async fn add_sentence_markers(
            &self,
            _paragraphs: &[MarkerRequest],
            _language: Option<&str>,
        ) -> Result<Vec<MarkedParagraph>> {
            let target = self.target.lock().unwrap().take();
            if let Some(id) = target {
                self.store.soft_delete(id).await?;
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_removal_during_ingest_is_not_undone() {
        let (_dir, store) = test_store().await;
        let marker = Arc::new(RemovingMarker {
            store: store.clone(),
            target: Mutex::new(None),
        });
        let ingester = Ingester::new(
            store,
            Segmenter::new(SegmentationConfig::default(), None),
            IngestConfig::default(),
        )
        .with_marker_oracle(Some(marker.clone() as Arc<dyn MarkerOracle>));

        let first = ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let doc_id = first.document_id.unwrap();
        *marker.target.lock().unwrap() = Some(doc_id);

        // the document resolved by id is tombstoned before the commit lands
        let edited = format!("{}\nA paragraph added in the new location.\n", HIDDEN_WORDS);
        let request = IngestRequest {
            doc_id: Some(doc_id),
            ..IngestRequest::new("Baha'i/Prayers/hidden-words.md", edited)
        };
        let report = ingester.ingest(request).await.unwrap();
        assert_eq!(report.status, IngestStatus::Ingested);
        assert_ne!(report.document_id, Some(doc_id));
        assert_eq!(report.paragraph_count, 4);

        let removed = ingester.store().document(doc_id).await.unwrap().unwrap();
        assert!(removed.is_deleted());
        assert_eq!(removed.file_path, PATH);
        assert!(ingester.store().paragraphs(doc_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_and_purge() {
        let (_dir, ingester) = ingester(None).await;
        ingester.ingest(IngestRequest::new(PATH, HIDDEN_WORDS)).await.unwrap();
        let other = "---\ntitle: Prayers\n---\nA prayer for the morning.\n";
        ingester
            .ingest(IngestRequest::new("Baha'i/Prayers/morning.md", other))
            .await
            .unwrap();

        let on_disk: HashSet<String> = [PATH.to_string()].into_iter().collect();
        let removed = ingester.reconcile(&on_disk).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].path, "Baha'i/Prayers/morning.md");

        let kept = ingester.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(kept.documents, 0);
        let purged = ingester.purge_expired(Utc::now() + chrono::Duration::days(31)).await.unwrap();
        assert_eq!(purged.documents, 1);
        assert_eq!(ingester.store().stats().await.unwrap().documents, 1);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/c.md"), "md");
        assert_eq!(extension_of("a.dir/notes"), "");
        assert_eq!(extension_of("plain.TXT"), "TXT");
    }
}
