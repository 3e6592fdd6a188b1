//! Append-only processing history (`job_processing_log`).

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct LogRow {
    pub file_name: Option<String>,
    pub stage: String,
    pub message: String,
    pub timestamp: String,
    pub file_index: Option<i64>,
    pub total_files: Option<i64>,
}

impl LogRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            file_name: row.get("file_name")?,
            stage: row.get("stage")?,
            message: row.get("message")?,
            timestamp: row.get("timestamp")?,
            file_index: row.get("file_index")?,
            total_files: row.get("total_files")?,
        })
    }
}

pub fn append(db: &Database, job_id: &str, entry: &LogRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_processing_log (job_id, file_name, stage, message, timestamp,
             file_index, total_files)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job_id,
                entry.file_name,
                entry.stage,
                entry.message,
                entry.timestamp,
                entry.file_index,
                entry.total_files,
            ],
        )?;
        Ok(())
    })
}

/// History for a job, oldest first.
pub fn find_by_job(db: &Database, job_id: &str) -> Result<Vec<LogRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT file_name, stage, message, timestamp, file_index, total_files
             FROM job_processing_log WHERE job_id = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], LogRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
