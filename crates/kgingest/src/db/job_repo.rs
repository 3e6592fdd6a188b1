//! Job repository: operations on the `jobs` table.
//!
//! Status transitions are guarded in SQL so that concurrent writers
//! (a live orchestrator and the recovery sweep) cannot resurrect a
//! terminal job. Each guarded update reports whether it applied.

use rusqlite::{params, Connection, ErrorCode, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: String,
    pub user_id: String,
    pub status: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub success_count: i64,
    pub fail_count: i64,
    pub start_time: String,
    pub end_time: Option<String>,
    pub endpoint: String,
    pub graph: String,
    pub job_dir: String,
    pub current_file: Option<String>,
    pub current_stage: Option<String>,
    pub status_message: Option<String>,
    pub unrecoverable: bool,
    pub unrecoverable_reason: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            user_id: row.get("user_id")?,
            status: row.get("status")?,
            total_files: row.get("total_files")?,
            processed_files: row.get("processed_files")?,
            success_count: row.get("success_count")?,
            fail_count: row.get("fail_count")?,
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
            endpoint: row.get("endpoint")?,
            graph: row.get("graph")?,
            job_dir: row.get("job_dir")?,
            current_file: row.get("current_file")?,
            current_stage: row.get("current_stage")?,
            status_message: row.get("status_message")?,
            unrecoverable: row.get("unrecoverable")?,
            unrecoverable_reason: row.get("unrecoverable_reason")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound on `start_time`.
    pub started_after: Option<String>,
    /// Inclusive upper bound on `start_time`.
    pub started_before: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row. Returns `false` when the id is already taken.
pub fn insert(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| insert_in(conn, job))
}

/// [`insert`] on a caller-held connection or transaction.
pub fn insert_in(conn: &Connection, job: &JobRow) -> Result<bool, DatabaseError> {
    let result = conn.execute(
        "INSERT INTO jobs (job_id, user_id, status, total_files, processed_files,
         success_count, fail_count, start_time, end_time, endpoint, graph, job_dir,
         current_file, current_stage, status_message, unrecoverable, unrecoverable_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            job.job_id,
            job.user_id,
            job.status,
            job.total_files,
            job.processed_files,
            job.success_count,
            job.fail_count,
            job.start_time,
            job.end_time,
            job.endpoint,
            job.graph,
            job.job_dir,
            job.current_file,
            job.current_stage,
            job.status_message,
            job.unrecoverable,
            job.unrecoverable_reason,
        ],
    );
    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, job_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_in(conn, job_id))
}

/// Same as [`find_by_id`] on an already-locked connection or transaction.
pub fn find_by_id_in(conn: &Connection, job_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE job_id = ?1")?;
    let mut rows = stmt.query_map(params![job_id], JobRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Finds a job by ID, but only if it belongs to `user_id`.
pub fn find_by_id_and_user(
    db: &Database,
    job_id: &str,
    user_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE job_id = ?1 AND user_id = ?2")?;
        let mut rows = stmt.query_map(params![job_id, user_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref user_id) = filter.user_id {
            conditions.push(format!("user_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(user_id.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref after) = filter.started_after {
            conditions.push(format!("start_time >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(after.clone()));
        }
        if let Some(ref before) = filter.started_before {
            conditions.push(format!("start_time <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(before.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(50) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY start_time DESC, job_id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Moves a job from `pending` to `running`. Returns whether the row changed.
pub fn promote_to_running(
    db: &Database,
    job_id: &str,
    message: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'running', status_message = ?2
             WHERE job_id = ?1 AND status = 'pending'",
            params![job_id, message],
        )?;
        Ok(changed > 0)
    })
}

/// Writes a terminal status, only while the job is still `pending` or `running`.
///
/// Returns `false` if the job was already terminal (or missing).
pub fn finalize(
    conn: &Connection,
    job_id: &str,
    status: &str,
    end_time: &str,
    message: Option<&str>,
    stage: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = ?2, end_time = ?3,
         status_message = COALESCE(?4, status_message), current_stage = ?5, current_file = NULL
         WHERE job_id = ?1 AND status IN ('pending', 'running')",
        params![job_id, status, end_time, message, stage],
    )?;
    Ok(changed > 0)
}

/// Updates the live processing fields. `None` leaves a field unchanged.
///
/// Terminal jobs are left alone so that late in-flight work cannot
/// overwrite the final status message.
pub fn update_processing_state(
    db: &Database,
    job_id: &str,
    current_file: Option<&str>,
    current_stage: Option<&str>,
    status_message: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET current_file = COALESCE(?2, current_file),
             current_stage = COALESCE(?3, current_stage),
             status_message = COALESCE(?4, status_message)
             WHERE job_id = ?1 AND status IN ('pending', 'running')",
            params![job_id, current_file, current_stage, status_message],
        )?;
        Ok(())
    })
}

/// Adds deltas to the progress counters.
pub fn increment_counters(
    conn: &Connection,
    job_id: &str,
    processed: i64,
    success: i64,
    fail: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET processed_files = processed_files + ?2,
         success_count = success_count + ?3, fail_count = fail_count + ?4
         WHERE job_id = ?1",
        params![job_id, processed, success, fail],
    )?;
    Ok(())
}

/// Finds `running`, recoverable jobs whose `start_time` lies in
/// `[oldest_start, newest_start]`, optionally narrowed to one user or job.
pub fn find_stale_running(
    db: &Database,
    oldest_start: &str,
    newest_start: &str,
    user_id: Option<&str>,
    job_id: Option<&str>,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs
             WHERE status = 'running' AND unrecoverable = 0
               AND start_time >= ?1 AND start_time <= ?2
               AND (?3 IS NULL OR user_id = ?3)
               AND (?4 IS NULL OR job_id = ?4)
             ORDER BY start_time ASC",
        )?;
        let rows = stmt
            .query_map(
                params![oldest_start, newest_start, user_id, job_id],
                JobRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Sets the unrecoverable flag and its reason.
pub fn mark_unrecoverable(db: &Database, job_id: &str, reason: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET unrecoverable = 1, unrecoverable_reason = ?2 WHERE job_id = ?1",
            params![job_id, reason],
        )?;
        Ok(changed > 0)
    })
}
