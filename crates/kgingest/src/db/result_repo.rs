//! Per-file result rows (`job_results`).

use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct ResultRow {
    pub file_name: String,
    pub ext: String,
    pub size_bytes: i64,
    pub elapsed_s: f64,
    pub http_status: i64,
    pub success: bool,
    pub bps: f64,
    pub response_body: String,
    pub created_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            file_name: row.get("file_name")?,
            ext: row.get("ext")?,
            size_bytes: row.get("size_bytes")?,
            elapsed_s: row.get("elapsed_s")?,
            http_status: row.get("http_status")?,
            success: row.get("success")?,
            bps: row.get("bps")?,
            response_body: row.get("response_body")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a batch of results. Callers wrap this in a transaction together
/// with the matching counter increment.
pub fn insert_batch(
    conn: &Connection,
    job_id: &str,
    rows: &[ResultRow],
) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO job_results (job_id, file_name, ext, size_bytes, elapsed_s, http_status,
         success, bps, response_body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in rows {
        stmt.execute(params![
            job_id,
            row.file_name,
            row.ext,
            row.size_bytes,
            row.elapsed_s,
            row.http_status,
            row.success,
            row.bps,
            row.response_body,
            row.created_at,
        ])?;
    }
    Ok(rows.len())
}

/// All results for a job in insertion order.
pub fn find_by_job(db: &Database, job_id: &str) -> Result<Vec<ResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT file_name, ext, size_bytes, elapsed_s, http_status, success, bps,
             response_body, created_at
             FROM job_results WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], ResultRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
