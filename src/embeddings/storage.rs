use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SifterError};
use crate::store::paragraphs::find_embedding;

/// Vectors are stored as little-endian f32 bytes
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(SifterError::Embedding(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// A live paragraph still waiting for its vector
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub id: i64,
    pub normalized_hash: String,
    pub text: String,
}

pub fn paragraphs_needing_embedding(conn: &Connection, limit: usize) -> Result<Vec<PendingEmbedding>> {
    let mut stmt = conn.prepare(
        "SELECT id, normalized_hash, text FROM paragraphs
         WHERE needs_embedding = 1 AND deleted_at IS NULL
         ORDER BY id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok(PendingEmbedding {
                id: row.get(0)?,
                normalized_hash: row.get(1)?,
                text: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

/// Existing vector bytes for a normalized hash produced by `model`
pub fn reusable_embedding(conn: &Connection, normalized_hash: &str, model: &str) -> Result<Option<Vec<u8>>> {
    Ok(find_embedding(conn, normalized_hash, Some(model))?.map(|(bytes, _)| bytes))
}

/// Attach vectors to paragraphs in one transaction. Each stored vector also flags the
/// paragraph for search re-sync. Returns the number of rows updated.
pub fn store_embeddings(conn: &mut Connection, rows: &[(i64, Vec<u8>)], model: &str, now: &str) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut stored = 0;
    {
        let mut stmt = tx.prepare_cached(
            "UPDATE paragraphs SET embedding = ?2, embedding_model = ?3, needs_embedding = 0,
                 needs_sync = 1, updated_at = ?4
             WHERE id = ?1",
        )?;
        for (id, bytes) in rows {
            stored += stmt.execute(params![id, bytes, model, now])?;
        }
    }
    tx.commit()?;
    Ok(stored)
}

pub fn get_embedding(conn: &Connection, paragraph_id: i64) -> Result<Option<Vec<f32>>> {
    let blob: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT embedding FROM paragraphs WHERE id = ?1",
            params![paragraph_id],
            |row| row.get(0),
        )
        .optional()?;
    match blob.flatten() {
        Some(bytes) => Ok(Some(decode_embedding(&bytes)?)),
        None => Ok(None),
    }
}
