//! The ingestion orchestrator: runs one job's staged files through the
//! per-file pipeline under bounded concurrency and finalizes the job.
//!
//! Results are flushed to the store in batches; each flush inserts the
//! results and bumps the counters in one transaction. The whole job races a
//! wall-clock deadline. When the deadline wins, files still waiting for a
//! permit never start, in-flight files are detached (their late results and
//! log entries are discarded) and the job is finalized as `error`.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, info_span, warn, Instrument};

use crate::broadcast::{JobProgressBroadcaster, JobProgressTracker};
use crate::config::IngestConfig;
use crate::error::{OrchestratorError, StoreError};
use crate::format::extension_of;
use crate::job::{FileResult, Job, JobStatus, ProcessingLogEntry, ProcessingStage};
use crate::pipeline::{
    FileContext, FileOutcome, JournalProgress, Pipeline, PipelineConfig, ProgressReporter,
};
use crate::sanitize::redact_path;
use crate::store::JobStore;
use crate::uploader::{Credentials, GraphTarget, Uploader};

/// Scratch directory inside a job directory. Entries starting with `.`
/// are never treated as staged files.
pub const WORK_DIR_NAME: &str = ".work";

/// Per-run knobs supplied by the submitter.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Requested parallelism, clamped to the configured maximum.
    pub concurrency: Option<usize>,
    pub skip_provenance: bool,
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    uploader: Arc<dyn Uploader>,
    config: Arc<IngestConfig>,
    credentials: Option<Credentials>,
    broadcaster: Option<JobProgressBroadcaster>,
    job_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        uploader: Arc<dyn Uploader>,
        config: Arc<IngestConfig>,
        credentials: Option<Credentials>,
    ) -> Self {
        let job_timeout = config.limits.job_timeout();
        Self {
            store,
            uploader,
            config,
            credentials,
            broadcaster: None,
            job_timeout,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: JobProgressBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Runs the job in the background.
    ///
    /// The job body runs in its own task so that a panic surfaces as a
    /// `JoinError` here; afterwards, whatever happened, a job this run
    /// left non-terminal is forced to `error`.
    pub fn spawn(self: &Arc<Self>, job_id: &str, options: RunOptions) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        let span = info_span!("job", job_id = %job_id);

        tokio::spawn(
            async move {
                let inner = {
                    let this = Arc::clone(&this);
                    let job_id = job_id.clone();
                    tokio::spawn(async move { this.run_job(&job_id, &options).await })
                };

                let failure = match inner.await {
                    Ok(Ok(status)) => {
                        info!(%status, "Job finished");
                        None
                    }
                    Ok(Err(OrchestratorError::NotPending { status, .. })) => {
                        warn!(%status, "Job was not pending; leaving it alone");
                        return;
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "Job failed");
                        Some(e.to_string())
                    }
                    Err(e) => {
                        error!(error = %e, "Job task aborted");
                        Some(format!("Job task aborted: {}", e))
                    }
                };
                this.ensure_finalized(&job_id, failure.as_deref());
            }
            .instrument(span),
        )
    }

    /// Processes every staged file of a pending job and finalizes it.
    ///
    /// Returns the stored terminal status. Errors are job-level: the job is
    /// missing or not pending, its directory is unreadable, the store
    /// failed, or the deadline passed.
    pub async fn run_job(
        &self,
        job_id: &str,
        options: &RunOptions,
    ) -> Result<JobStatus, OrchestratorError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(OrchestratorError::NotPending {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }

        let files = list_staged_files(&job.job_dir).await?;
        let tracker = self.broadcaster.as_ref().map(|b| b.track(job_id));
        let journal = Arc::new(JournalProgress::new(
            Arc::clone(&self.store),
            job_id,
            tracker.clone(),
        ));

        if files.is_empty() {
            let message = "No files to process";
            self.finalize(&job, JobStatus::Done, message, tracker.as_ref())?;
            journal.report(ProcessingLogEntry::job_level(ProcessingStage::Completed, message));
            return Ok(JobStatus::Done);
        }

        let concurrency = self.config.limits.clamp_concurrency(options.concurrency);
        let start_message = format!(
            "Processing {} files with concurrency {}",
            files.len(),
            concurrency
        );
        if !self
            .store
            .update_status(job_id, JobStatus::Running, None, Some(&start_message))?
        {
            return Err(OrchestratorError::NotPending {
                job_id: job_id.to_string(),
                status: "no longer pending".to_string(),
            });
        }
        if let Some(tracker) = &tracker {
            tracker.status_changed(JobStatus::Running, ProcessingStage::Processing, &start_message);
        }
        journal.report(ProcessingLogEntry::job_level(
            ProcessingStage::Processing,
            start_message.clone(),
        ));
        info!(files = files.len(), concurrency, "Job started");

        let work_dir = job.job_dir.join(WORK_DIR_NAME);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| OrchestratorError::Staging {
                path: work_dir.clone(),
                source: e,
            })?;

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PipelineConfig::from_config(
                &self.config,
                &job.owner,
                GraphTarget {
                    endpoint: job.endpoint.clone(),
                    graph: job.graph.clone(),
                },
                self.credentials.clone(),
                options.skip_provenance,
                work_dir.clone(),
            )),
            Arc::clone(&self.uploader),
        ));

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let reporter: Arc<dyn ProgressReporter> = journal.clone();
        let mut set = spawn_files(&files, job_id, &semaphore, &pipeline, &reporter);
        let mut batch: Vec<FileResult> = Vec::new();
        let batch_size = self.config.limits.result_batch_size.max(1);

        let drained = tokio::time::timeout(
            self.job_timeout,
            self.drain(job_id, &mut set, &mut batch, batch_size),
        )
        .await;

        let status = match drained {
            Ok(Ok(())) => {
                self.flush(job_id, &mut batch).await?;
                let job = self
                    .store
                    .get_job(job_id)?
                    .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
                let message = format!(
                    "Processed {} of {} files: {} succeeded, {} failed",
                    job.processed_files, job.total_files, job.success_count, job.fail_count
                );
                journal.report(ProcessingLogEntry::job_level(
                    ProcessingStage::Finalizing,
                    message.clone(),
                ));
                self.finalize(&job, JobStatus::Done, &message, tracker.as_ref())?;
                Ok(JobStatus::Done)
            }
            Ok(Err(e)) => {
                semaphore.close();
                set.detach_all();
                journal.close();
                let pending = batch.len();
                match self.flush(job_id, &mut batch).await {
                    Ok(()) => Err(e),
                    Err(flush_err) => {
                        error!(error = %flush_err, pending, "Failed to persist finished results");
                        Err(OrchestratorError::Task(format!(
                            "{}; {} finished results were not persisted: {}",
                            e, pending, flush_err
                        )))
                    }
                }
            }
            Err(_) => {
                semaphore.close();
                set.detach_all();
                self.flush(job_id, &mut batch).await?;
                let secs = self.job_timeout.as_secs();
                let job = self
                    .store
                    .get_job(job_id)?
                    .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
                let message = format!(
                    "Job timed out after {} seconds with {} of {} files processed",
                    secs, job.processed_files, job.total_files
                );
                warn!(secs, "Job deadline exceeded");
                journal.report(ProcessingLogEntry::job_level(ProcessingStage::Failed, message.clone()));
                journal.close();
                self.finalize(&job, JobStatus::Error, &message, tracker.as_ref())?;
                Err(OrchestratorError::Timeout { secs })
            }
        };

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!(error = %e, "Failed to remove work directory");
        }
        status
    }

    async fn drain(
        &self,
        job_id: &str,
        set: &mut JoinSet<Option<FileOutcome>>,
        batch: &mut Vec<FileResult>,
        batch_size: usize,
    ) -> Result<(), OrchestratorError> {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(outcome)) => batch.push(outcome.into_result()),
                Ok(None) => {}
                Err(e) => error!(error = %e, "File task ended without a result"),
            }
            if batch.len() >= batch_size {
                self.flush(job_id, batch).await?;
            }
        }
        Ok(())
    }

    /// Persists the pending batch. The batch is cleared only once the
    /// insert has committed.
    async fn flush(&self, job_id: &str, batch: &mut Vec<FileResult>) -> Result<(), OrchestratorError> {
        if batch.is_empty() {
            return Ok(());
        }
        let results = batch.clone();
        let store = Arc::clone(&self.store);
        let id = job_id.to_string();
        tokio::task::spawn_blocking(move || store.insert_results_batch(&id, &results))
            .await
            .map_err(|e| OrchestratorError::Task(e.to_string()))??;
        batch.clear();
        Ok(())
    }

    fn finalize(
        &self,
        job: &Job,
        status: JobStatus,
        message: &str,
        tracker: Option<&JobProgressTracker>,
    ) -> Result<bool, StoreError> {
        let applied = self
            .store
            .update_status(&job.job_id, status, Some(Utc::now()), Some(message))?;
        if applied {
            if let Some(tracker) = tracker {
                let stage = match status {
                    JobStatus::Error => ProcessingStage::Failed,
                    _ => ProcessingStage::Completed,
                };
                tracker.status_changed(status, stage, message);
            }
        } else {
            warn!(job_id = %job.job_id, %status, "Job was already terminal; status left unchanged");
        }
        Ok(applied)
    }

    /// Forces a job left `pending` or `running` to `error`.
    fn ensure_finalized(&self, job_id: &str, failure: Option<&str>) {
        let job = match self.store.get_job(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "Could not read job for final status check");
                return;
            }
        };
        if job.status.is_terminal() {
            return;
        }
        let message = failure.unwrap_or("Job ended without reaching a terminal state");
        warn!(status = %job.status, "Forcing job to error");
        let tracker = self.broadcaster.as_ref().map(|b| b.track(job_id));
        if let Err(e) = self.finalize(&job, JobStatus::Error, message, tracker.as_ref()) {
            error!(error = %e, "Failed to force job to error");
        }
    }
}

/// One task per file, gated by `semaphore`. A task that finds the
/// semaphore closed yields `None` without touching its file.
fn spawn_files(
    files: &[PathBuf],
    job_id: &str,
    semaphore: &Arc<Semaphore>,
    pipeline: &Arc<Pipeline>,
    journal: &Arc<dyn ProgressReporter>,
) -> JoinSet<Option<FileOutcome>> {
    let total = files.len() as u32;
    let mut set = JoinSet::new();

    for (i, path) in files.iter().enumerate() {
        let semaphore = Arc::clone(semaphore);
        let pipeline = Arc::clone(pipeline);
        let journal = Arc::clone(journal);
        let ctx = FileContext::new(job_id, path.clone(), i as u32 + 1, total);

        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return None;
            };
            let file_name = ctx.file_name.clone();
            let run = pipeline.run(ctx, journal.as_ref());
            let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(file = %file_name, "File processing panicked");
                    FileOutcome::Failed(FileResult::local_failure(
                        &file_name,
                        &extension_of(&file_name),
                        0,
                        "Internal error while processing file",
                    ))
                }
            };
            Some(outcome)
        });
    }
    set
}

/// Regular files directly inside `job_dir`, sorted by name, skipping
/// dot-entries.
pub async fn list_staged_files(job_dir: &Path) -> Result<Vec<PathBuf>, OrchestratorError> {
    let staging = |e| OrchestratorError::Staging {
        path: job_dir.to_path_buf(),
        source: e,
    };
    let mut entries = tokio::fs::read_dir(job_dir).await.map_err(staging)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(staging)? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().await.map_err(staging)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    if !files.is_empty() {
        tracing::debug!(
            first = %redact_path(&files[0]),
            count = files.len(),
            "Staged files listed"
        );
    }
    Ok(files)
}
