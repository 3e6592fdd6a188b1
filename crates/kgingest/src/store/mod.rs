//! Job Store: the durable source of truth for job state.
//!
//! The orchestrator, the recovery manager and the service facade receive
//! an `Arc<dyn JobStore>` at construction; nothing reaches for a global
//! handle.

mod sqlite;

pub use sqlite::SqliteJobStore;

use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::job::{FileResult, Job, JobStatus, NewJob, ProcessingLogEntry};

/// Filter for listing one owner's jobs.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Persistence operations consumed by the engine.
///
/// Implementations must be safe to call from many workers at once.
pub trait JobStore: Send + Sync {
    /// Creates a job in `pending`. Fails with [`StoreError::DuplicateJob`] if the id exists.
    fn create_job(&self, new_job: &NewJob) -> Result<Job, StoreError>;

    /// Creates a job together with results recorded before it starts
    /// (files rejected at submission). The job row, the results and the
    /// counters commit as one unit or not at all.
    fn create_job_with_results(
        &self,
        new_job: &NewJob,
        results: &[FileResult],
    ) -> Result<Job, StoreError>;

    fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Like [`JobStore::get_job`], but `None` unless `owner` owns the job.
    fn get_job_for_owner(&self, job_id: &str, owner: &str) -> Result<Option<Job>, StoreError>;

    /// Newest first. Returns the page and the total number of matches.
    fn list_jobs(&self, owner: &str, filter: &JobListFilter) -> Result<(Vec<Job>, u64), StoreError>;

    /// Applies a status transition.
    ///
    /// `Running` only applies to a `pending` job. Terminal statuses only
    /// apply to a job that is not terminal yet, so a terminal job is never
    /// resurrected and the first terminal writer wins. Returns whether the
    /// transition applied.
    fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        end_time: Option<DateTime<Utc>>,
        message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Updates live progress fields. `None` leaves a field unchanged.
    fn update_processing_state(
        &self,
        job_id: &str,
        current_file: Option<&str>,
        current_stage: Option<&str>,
        status_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Inserts a batch of results and increments the counters by the
    /// batch's totals as one atomic unit.
    fn insert_results_batch(&self, job_id: &str, results: &[FileResult]) -> Result<(), StoreError>;

    fn append_log(&self, job_id: &str, entry: &ProcessingLogEntry) -> Result<(), StoreError>;

    fn get_results(&self, job_id: &str) -> Result<Vec<FileResult>, StoreError>;

    fn get_logs(&self, job_id: &str) -> Result<Vec<ProcessingLogEntry>, StoreError>;

    /// Running, recoverable jobs whose age lies in `[min_age, max_age]`.
    fn find_stale_running_jobs(
        &self,
        min_age: Duration,
        max_age: Duration,
        owner: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<Vec<Job>, StoreError>;

    fn mark_unrecoverable(&self, job_id: &str, reason: &str) -> Result<(), StoreError>;

    /// Terminates a stale job as `error` and records `explanation`
    /// alongside, without touching the counters. Returns `false` if the
    /// job was already terminal.
    fn recover_job(
        &self,
        job_id: &str,
        message: &str,
        explanation: &FileResult,
    ) -> Result<bool, StoreError>;
}
