use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{Result, SifterError};

/// One rejected ingestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub id: i64,
    pub file_path: String,
    pub error_type: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: String,
}

pub fn record_failure(
    conn: &Connection,
    file_path: &str,
    error_type: &str,
    message: &str,
    details: &serde_json::Value,
    now: &str,
) -> Result<i64> {
    let details = serde_json::to_string(details)
        .map_err(|e| SifterError::Parse(format!("failure details: {}", e)))?;
    conn.execute(
        "INSERT INTO document_failures (file_path, error_type, message, details_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![file_path, error_type, message, details, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn clear_failures(conn: &Connection, file_path: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM document_failures WHERE file_path = ?1", params![file_path])?)
}

/// Every recorded failure, newest first
pub fn list_failures(conn: &Connection) -> Result<Vec<DocumentFailure>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_path, error_type, message, details_json, created_at
         FROM document_failures ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let details: String = row.get(4)?;
            Ok(DocumentFailure {
                id: row.get(0)?,
                file_path: row.get(1)?,
                error_type: row.get(2)?,
                message: row.get(3)?,
                details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}
