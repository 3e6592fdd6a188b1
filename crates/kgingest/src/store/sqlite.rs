//! SQLite-backed [`JobStore`].

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};

use super::{JobListFilter, JobStore};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::log_repo::{self, LogRow};
use crate::db::result_repo::{self, ResultRow};
use crate::db::{Database, DatabaseError};
use crate::error::StoreError;
use crate::job::{
    format_timestamp, parse_timestamp, FileResult, Job, JobStatus, NewJob, ProcessingLogEntry,
    ProcessingStage,
};

// ─── Row conversion ─────────────────────────────────────────────────────────

fn to_u32(v: i64) -> u32 {
    u32::try_from(v).unwrap_or_default()
}

fn timestamp(column: &'static str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(s).ok_or_else(|| DatabaseError::InvalidValue {
        column,
        value: s.to_string(),
    })
}

fn job_from_row(row: JobRow) -> Result<Job, DatabaseError> {
    let status = row
        .status
        .parse::<JobStatus>()
        .map_err(|_| DatabaseError::InvalidValue {
            column: "status",
            value: row.status.clone(),
        })?;
    let start_time = timestamp("start_time", &row.start_time)?;
    let end_time = row
        .end_time
        .as_deref()
        .map(|s| timestamp("end_time", s))
        .transpose()?;

    Ok(Job {
        job_id: row.job_id,
        owner: row.user_id,
        status,
        total_files: to_u32(row.total_files),
        processed_files: to_u32(row.processed_files),
        success_count: to_u32(row.success_count),
        fail_count: to_u32(row.fail_count),
        start_time,
        end_time,
        graph: row.graph,
        endpoint: row.endpoint,
        job_dir: PathBuf::from(row.job_dir),
        current_file: row.current_file,
        current_stage: row.current_stage,
        status_message: row.status_message,
        unrecoverable: row.unrecoverable,
        unrecoverable_reason: row.unrecoverable_reason,
    })
}

fn result_to_row(result: &FileResult, created_at: &str) -> ResultRow {
    ResultRow {
        file_name: result.file_name.clone(),
        ext: result.ext.clone(),
        size_bytes: i64::try_from(result.size_bytes).unwrap_or(i64::MAX),
        elapsed_s: result.elapsed_s,
        http_status: i64::from(result.http_status),
        success: result.success,
        bps: result.bps,
        response_body: result.response_body.clone(),
        created_at: created_at.to_string(),
    }
}

fn result_from_row(row: ResultRow) -> FileResult {
    FileResult {
        file_name: row.file_name,
        ext: row.ext,
        size_bytes: u64::try_from(row.size_bytes).unwrap_or_default(),
        elapsed_s: row.elapsed_s,
        http_status: u16::try_from(row.http_status).unwrap_or_default(),
        success: row.success,
        bps: row.bps,
        response_body: row.response_body,
    }
}

fn log_from_row(row: LogRow) -> Result<ProcessingLogEntry, DatabaseError> {
    let stage = row
        .stage
        .parse::<ProcessingStage>()
        .map_err(|_| DatabaseError::InvalidValue {
            column: "stage",
            value: row.stage.clone(),
        })?;
    Ok(ProcessingLogEntry {
        file_name: row.file_name,
        stage,
        message: row.message,
        timestamp: timestamp("timestamp", &row.timestamp)?,
        file_index: row.file_index.map(to_u32),
        total_files: row.total_files.map(to_u32),
    })
}

// ─── SqliteJobStore ─────────────────────────────────────────────────────────

/// Job store backed by the SQLite [`Database`].
///
/// Counter increments and result inserts share one transaction, and the
/// single connection mutex serializes concurrent batches.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, new_job: &NewJob) -> Result<Job, StoreError> {
        self.create_job_with_results(new_job, &[])
    }

    fn create_job_with_results(
        &self,
        new_job: &NewJob,
        results: &[FileResult],
    ) -> Result<Job, StoreError> {
        let mut row = JobRow {
            job_id: new_job.job_id.clone(),
            user_id: new_job.owner.clone(),
            status: JobStatus::Pending.as_str().to_string(),
            total_files: i64::from(new_job.total_files),
            processed_files: 0,
            success_count: 0,
            fail_count: 0,
            start_time: format_timestamp(new_job.start_time),
            end_time: None,
            endpoint: new_job.endpoint.clone(),
            graph: new_job.graph.clone(),
            job_dir: new_job.job_dir.to_string_lossy().into_owned(),
            current_file: None,
            current_stage: Some(ProcessingStage::Queued.as_str().to_string()),
            status_message: Some("Job queued".to_string()),
            unrecoverable: false,
            unrecoverable_reason: None,
        };
        let created_at = format_timestamp(Utc::now());
        let rows: Vec<ResultRow> = results
            .iter()
            .map(|r| result_to_row(r, &created_at))
            .collect();
        let success = results.iter().filter(|r| r.success).count() as i64;
        let processed = results.len() as i64;

        let inserted = self.db.transaction(|tx| {
            if !job_repo::insert_in(tx, &row)? {
                return Ok(false);
            }
            if !rows.is_empty() {
                result_repo::insert_batch(tx, &row.job_id, &rows)?;
                job_repo::increment_counters(tx, &row.job_id, processed, success, processed - success)?;
            }
            Ok(true)
        })?;
        if !inserted {
            return Err(StoreError::DuplicateJob(new_job.job_id.clone()));
        }
        row.processed_files = processed;
        row.success_count = success;
        row.fail_count = processed - success;
        Ok(job_from_row(row)?)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let row = job_repo::find_by_id(&self.db, job_id)?;
        Ok(row.map(job_from_row).transpose()?)
    }

    fn get_job_for_owner(&self, job_id: &str, owner: &str) -> Result<Option<Job>, StoreError> {
        let row = job_repo::find_by_id_and_user(&self.db, job_id, owner)?;
        Ok(row.map(job_from_row).transpose()?)
    }

    fn list_jobs(&self, owner: &str, filter: &JobListFilter) -> Result<(Vec<Job>, u64), StoreError> {
        let repo_filter = JobFilter {
            user_id: Some(owner.to_string()),
            status: filter.status.map(|s| s.as_str().to_string()),
            started_after: filter.started_after.map(format_timestamp),
            started_before: filter.started_before.map(format_timestamp),
            limit: filter.limit,
            offset: filter.offset,
        };
        let (rows, total) = job_repo::query(&self.db, &repo_filter)?;
        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        end_time: Option<DateTime<Utc>>,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let applied = match status {
            JobStatus::Pending => false,
            JobStatus::Running => job_repo::promote_to_running(
                &self.db,
                job_id,
                message.unwrap_or("Processing started"),
            )?,
            JobStatus::Done | JobStatus::Error => {
                let end = format_timestamp(end_time.unwrap_or_else(Utc::now));
                let stage = if status == JobStatus::Done {
                    ProcessingStage::Completed
                } else {
                    ProcessingStage::Failed
                };
                self.db.with_conn(|conn| {
                    job_repo::finalize(conn, job_id, status.as_str(), &end, message, stage.as_str())
                })?
            }
        };
        if !applied {
            log::debug!("Status {} not applied to job {}", status, job_id);
        }
        Ok(applied)
    }

    fn update_processing_state(
        &self,
        job_id: &str,
        current_file: Option<&str>,
        current_stage: Option<&str>,
        status_message: Option<&str>,
    ) -> Result<(), StoreError> {
        job_repo::update_processing_state(
            &self.db,
            job_id,
            current_file,
            current_stage,
            status_message,
        )?;
        Ok(())
    }

    fn insert_results_batch(&self, job_id: &str, results: &[FileResult]) -> Result<(), StoreError> {
        if results.is_empty() {
            return Ok(());
        }
        let created_at = format_timestamp(Utc::now());
        let rows: Vec<ResultRow> = results
            .iter()
            .map(|r| result_to_row(r, &created_at))
            .collect();
        let success = results.iter().filter(|r| r.success).count() as i64;
        let processed = results.len() as i64;

        let found = self.db.transaction(|tx| {
            if job_repo::find_by_id_in(tx, job_id)?.is_none() {
                return Ok(false);
            }
            result_repo::insert_batch(tx, job_id, &rows)?;
            job_repo::increment_counters(tx, job_id, processed, success, processed - success)?;
            Ok(true)
        })?;
        if !found {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    fn append_log(&self, job_id: &str, entry: &ProcessingLogEntry) -> Result<(), StoreError> {
        let row = LogRow {
            file_name: entry.file_name.clone(),
            stage: entry.stage.as_str().to_string(),
            message: entry.message.clone(),
            timestamp: format_timestamp(entry.timestamp),
            file_index: entry.file_index.map(i64::from),
            total_files: entry.total_files.map(i64::from),
        };
        log_repo::append(&self.db, job_id, &row)?;
        Ok(())
    }

    fn get_results(&self, job_id: &str) -> Result<Vec<FileResult>, StoreError> {
        let rows = result_repo::find_by_job(&self.db, job_id)?;
        Ok(rows.into_iter().map(result_from_row).collect())
    }

    fn get_logs(&self, job_id: &str) -> Result<Vec<ProcessingLogEntry>, StoreError> {
        let rows = log_repo::find_by_job(&self.db, job_id)?;
        Ok(rows
            .into_iter()
            .map(log_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn find_stale_running_jobs(
        &self,
        min_age: Duration,
        max_age: Duration,
        owner: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<Vec<Job>, StoreError> {
        let now = Utc::now();
        let oldest_start = format_timestamp(now - max_age);
        let newest_start = format_timestamp(now - min_age);
        let rows =
            job_repo::find_stale_running(&self.db, &oldest_start, &newest_start, owner, job_id)?;
        Ok(rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn mark_unrecoverable(&self, job_id: &str, reason: &str) -> Result<(), StoreError> {
        if !job_repo::mark_unrecoverable(&self.db, job_id, reason)? {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    fn recover_job(
        &self,
        job_id: &str,
        message: &str,
        explanation: &FileResult,
    ) -> Result<bool, StoreError> {
        let now = format_timestamp(Utc::now());
        let row = result_to_row(explanation, &now);
        let applied = self.db.transaction(|tx| {
            let applied = job_repo::finalize(
                tx,
                job_id,
                JobStatus::Error.as_str(),
                &now,
                Some(message),
                ProcessingStage::Recovered.as_str(),
            )?;
            if applied {
                result_repo::insert_batch(tx, job_id, std::slice::from_ref(&row))?;
            }
            Ok(applied)
        })?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(Database::open_in_memory().unwrap())
    }

    fn new_job(id: &str, age: Duration) -> NewJob {
        NewJob {
            job_id: id.to_string(),
            owner: "alice".to_string(),
            total_files: 3,
            endpoint: "http://localhost:7878/store".to_string(),
            graph: "https://example.org/g".to_string(),
            job_dir: PathBuf::from(format!("/tmp/{}", id)),
            start_time: Utc::now() - age,
        }
    }

    fn result(name: &str, success: bool) -> FileResult {
        FileResult {
            file_name: name.to_string(),
            ext: "ttl".to_string(),
            size_bytes: 10,
            elapsed_s: 0.1,
            http_status: if success { 201 } else { 500 },
            success,
            bps: 100.0,
            response_body: String::new(),
        }
    }

    #[test]
    fn test_create_and_duplicate() {
        let store = store();
        let job = store.create_job(&new_job("j1", Duration::zero())).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_files, 3);

        let err = store
            .create_job(&new_job("j1", Duration::zero()))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateJob(id) if id == "j1"));
    }

    #[test]
    fn test_create_with_results_is_one_unit() {
        let store = store();
        let job = store
            .create_job_with_results(
                &new_job("j1", Duration::zero()),
                &[result("bad.txt", false)],
            )
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.processed_files, 1);
        assert_eq!(job.fail_count, 1);
        assert_eq!(store.get_results("j1").unwrap().len(), 1);

        let err = store
            .create_job_with_results(
                &new_job("j1", Duration::zero()),
                &[result("a.ttl", true), result("b.ttl", false)],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateJob(_)));
        let stored = store.get_job("j1").unwrap().unwrap();
        assert_eq!(stored.processed_files, 1);
        assert_eq!(stored.success_count, 0);
        assert_eq!(store.get_results("j1").unwrap().len(), 1);
    }

    #[test]
    fn test_status_never_leaves_terminal() {
        let store = store();
        store.create_job(&new_job("j1", Duration::zero())).unwrap();

        assert!(store.update_status("j1", JobStatus::Running, None, None).unwrap());
        assert!(store
            .update_status("j1", JobStatus::Error, None, Some("timed out"))
            .unwrap());
        assert!(!store.update_status("j1", JobStatus::Done, None, None).unwrap());
        assert!(!store.update_status("j1", JobStatus::Running, None, None).unwrap());

        let job = store.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.end_time.is_some());
        assert_eq!(job.status_message.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_results_batch_updates_counters() {
        let store = store();
        store.create_job(&new_job("j1", Duration::zero())).unwrap();
        store
            .insert_results_batch("j1", &[result("a", true), result("b", false)])
            .unwrap();

        let job = store.get_job("j1").unwrap().unwrap();
        assert_eq!(job.processed_files, 2);
        assert_eq!(job.success_count, 1);
        assert_eq!(job.fail_count, 1);
        assert_eq!(store.get_results("j1").unwrap().len(), 2);

        assert!(matches!(
            store.insert_results_batch("missing", &[result("a", true)]),
            Err(StoreError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_batches_do_not_drift() {
        let store = Arc::new(store());
        let mut job = new_job("j1", Duration::zero());
        job.total_files = 80;
        store.create_job(&job).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..5 {
                        let batch = [
                            result(&format!("{}-{}-a", t, i), true),
                            result(&format!("{}-{}-b", t, i), false),
                        ];
                        store.insert_results_batch("j1", &batch).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let job = store.get_job("j1").unwrap().unwrap();
        assert_eq!(job.processed_files, 80);
        assert_eq!(job.success_count + job.fail_count, job.processed_files);
    }

    #[test]
    fn test_logs_round_trip_in_order() {
        let store = store();
        store.create_job(&new_job("j1", Duration::zero())).unwrap();
        store
            .append_log(
                "j1",
                &ProcessingLogEntry::for_file("a.ttl", ProcessingStage::Processing, "", 1, 3),
            )
            .unwrap();
        store
            .append_log(
                "j1",
                &ProcessingLogEntry::job_level(ProcessingStage::Finalizing, "done"),
            )
            .unwrap();

        let logs = store.get_logs("j1").unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].stage, ProcessingStage::Processing);
        assert_eq!(logs[0].file_index, Some(1));
        assert!(logs[1].file_name.is_none());
    }

    #[test]
    fn test_stale_window_and_recovery() {
        let store = store();
        for (id, age) in [
            ("young", Duration::minutes(5)),
            ("stale", Duration::hours(4)),
            ("ancient", Duration::days(60)),
        ] {
            store.create_job(&new_job(id, age)).unwrap();
            store.update_status(id, JobStatus::Running, None, None).unwrap();
        }

        let stale = store
            .find_stale_running_jobs(Duration::hours(3), Duration::days(30), None, None)
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].job_id, "stale");

        let note = FileResult::local_failure("recovery", "recovery", 0, "presumed crash");
        assert!(store.recover_job("stale", "recovered", &note).unwrap());
        assert!(!store.recover_job("stale", "recovered", &note).unwrap());

        let job = store.get_job("stale").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.processed_files, 0);
        assert_eq!(store.get_results("stale").unwrap().len(), 1);
    }

    #[test]
    fn test_list_jobs_scoped_to_owner() {
        let store = store();
        store.create_job(&new_job("a1", Duration::hours(2))).unwrap();
        store.create_job(&new_job("a2", Duration::hours(1))).unwrap();
        let mut foreign = new_job("b1", Duration::zero());
        foreign.owner = "bob".to_string();
        store.create_job(&foreign).unwrap();

        let (jobs, total) = store.list_jobs("alice", &JobListFilter::default()).unwrap();
        assert_eq!(total, 2);
        assert_eq!(jobs[0].job_id, "a2");

        let (jobs, _) = store
            .list_jobs(
                "alice",
                &JobListFilter {
                    started_after: Some(Utc::now() - Duration::minutes(90)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(store.get_job_for_owner("b1", "alice").unwrap().is_none());
    }
}
