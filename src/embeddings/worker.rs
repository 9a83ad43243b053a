//! Embedding worker: fills in vectors for paragraphs flagged `needs_embedding`.
//!
//! Vectors are looked up in order of cost: a stored vector with the same normalized hash
//! and model, then the in-memory cache, then the embedder (one call per distinct text).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::cache::EmbeddingCache;
use crate::db::Db;
use crate::error::Result;
use crate::markers;
use crate::oracle::Embedder;
use crate::store::timestamp;

use super::storage::{
    encode_embedding, paragraphs_needing_embedding, reusable_embedding, store_embeddings, PendingEmbedding,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingRun {
    /// Paragraphs that were waiting when the run started.
    pub pending: usize,
    pub reused: usize,
    pub cached: usize,
    pub embedded: usize,
    pub failed: usize,
}

impl EmbeddingRun {
    pub fn stored(&self) -> usize {
        self.reused + self.cached + self.embedded
    }
}

pub struct EmbeddingWorker {
    db: Db,
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    batch_size: usize,
}

impl EmbeddingWorker {
    pub fn new(db: Db, embedder: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>, batch_size: usize) -> Self {
        Self {
            db,
            embedder,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    /// Process up to `limit` waiting paragraphs
    pub async fn run_once(&self, limit: usize) -> Result<EmbeddingRun> {
        let model = self.embedder.model().to_string();
        let mut run = EmbeddingRun::default();

        // store reuse happens in one blocking call; what is left needs the cache or the embedder
        let (missing, reused) = {
            let model = model.clone();
            self.db
                .with_connection(move |conn| {
                    let pending = paragraphs_needing_embedding(conn, limit)?;
                    let mut missing = Vec::new();
                    let mut reused = Vec::new();
                    for paragraph in pending {
                        match reusable_embedding(conn, &paragraph.normalized_hash, &model)? {
                            Some(bytes) => reused.push((paragraph.id, bytes)),
                            None => missing.push(paragraph),
                        }
                    }
                    if !reused.is_empty() {
                        store_embeddings(conn, &reused, &model, &timestamp(Utc::now()))?;
                    }
                    Ok((missing, reused.len()))
                })
                .await?
        };
        run.reused = reused;
        run.pending = reused + missing.len();
        if missing.is_empty() {
            return Ok(run);
        }

        let mut rows: Vec<(i64, Vec<u8>)> = Vec::new();
        let mut by_hash: HashMap<String, Vec<PendingEmbedding>> = HashMap::new();
        for paragraph in missing {
            match self.cache.get(&paragraph.normalized_hash) {
                Some(vector) => {
                    rows.push((paragraph.id, encode_embedding(&vector)));
                    run.cached += 1;
                }
                None => by_hash.entry(paragraph.normalized_hash.clone()).or_default().push(paragraph),
            }
        }

        let mut hashes: Vec<String> = by_hash.keys().cloned().collect();
        hashes.sort_unstable();
        for batch in hashes.chunks(self.batch_size) {
            let texts: Vec<String> = batch
                .iter()
                .map(|h| markers::strip(&by_hash[h][0].text))
                .collect();

            let vectors = match self.embedder.embed(&texts).await {
                Ok(vectors) if vectors.len() == texts.len() => vectors,
                Ok(vectors) => {
                    log::error!("Embedder returned {} vectors for {} texts", vectors.len(), texts.len());
                    run.failed += batch.iter().map(|h| by_hash[h].len()).sum::<usize>();
                    continue;
                }
                Err(e) => {
                    log::error!("Failed to embed batch of {}: {}", texts.len(), e);
                    run.failed += batch.iter().map(|h| by_hash[h].len()).sum::<usize>();
                    continue;
                }
            };

            for (hash, vector) in batch.iter().zip(vectors) {
                let bytes = encode_embedding(&vector);
                for paragraph in &by_hash[hash] {
                    rows.push((paragraph.id, bytes.clone()));
                    run.embedded += 1;
                }
                self.cache.put(hash.clone(), vector);
            }
            log::debug!("Embedded batch of {} distinct texts", batch.len());
        }

        if !rows.is_empty() {
            self.db
                .with_connection(move |conn| store_embeddings(conn, &rows, &model, &timestamp(Utc::now())))
                .await?;
        }

        log::info!(
            "Embedding run: {} pending, {} reused, {} cached, {} embedded, {} failed",
            run.pending,
            run.reused,
            run.cached,
            run.embedded,
            run.failed
        );
        Ok(run)
    }

    /// Keep running until no paragraph is waiting or a run makes no progress
    pub async fn run_until_idle(&self, limit: usize) -> Result<EmbeddingRun> {
        let mut total = EmbeddingRun::default();
        loop {
            let run = self.run_once(limit).await?;
            total.pending += run.pending;
            total.reused += run.reused;
            total.cached += run.cached;
            total.embedded += run.embedded;
            total.failed += run.failed;
            if run.pending == 0 || run.stored() == 0 {
                return Ok(total);
            }
        }
    }
}
