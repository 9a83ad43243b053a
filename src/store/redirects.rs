use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Point `old_url` at `new_url`.
///
/// Redirects that pointed at `old_url` are moved to `new_url` so chains never form, and a
/// redirect away from `new_url` is dropped because that URL is live again.
pub fn upsert_redirect(conn: &Connection, old_url: &str, new_url: &str, doc_id: i64, now: &str) -> Result<()> {
    if old_url == new_url {
        return Ok(());
    }
    conn.execute("DELETE FROM redirects WHERE old_path = ?1", params![new_url])?;
    conn.execute(
        "UPDATE redirects SET new_path = ?2 WHERE new_path = ?1",
        params![old_url, new_url],
    )?;
    conn.execute(
        "INSERT INTO redirects (old_path, new_path, doc_id, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(old_path) DO UPDATE SET new_path = excluded.new_path,
             doc_id = excluded.doc_id, created_at = excluded.created_at",
        params![old_url, new_url, doc_id, now],
    )?;
    Ok(())
}

/// Where `url` redirects to, if anywhere
pub fn resolve_redirect(conn: &Connection, url: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT new_path FROM redirects WHERE old_path = ?1", params![url], |row| row.get(0))
        .optional()?)
}
