use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::broadcast::job_progress::JobProgressTracker;
use crate::job::{ProcessingLogEntry, ProcessingStage};
use crate::store::JobStore;

/// Receives every stage transition of a job.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, entry: ProcessingLogEntry);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProcessingLogEntry) {}
}

/// Collects entries in memory.
#[derive(Default)]
pub struct RecordingProgress {
    entries: Mutex<Vec<ProcessingLogEntry>>,
}

impl RecordingProgress {
    pub fn entries(&self) -> Vec<ProcessingLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, entry: ProcessingLogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Persists entries to the job's processing log, mirrors file-level
/// entries into the job's live state and forwards everything to an
/// optional broadcast tracker.
///
/// Every store write here is best-effort: a failure is logged and
/// ingestion carries on. Once closed, entries are dropped.
pub struct JournalProgress {
    store: Arc<dyn JobStore>,
    job_id: String,
    tracker: Option<JobProgressTracker>,
    closed: AtomicBool,
}

impl JournalProgress {
    pub fn new(store: Arc<dyn JobStore>, job_id: &str, tracker: Option<JobProgressTracker>) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            tracker,
            closed: AtomicBool::new(false),
        }
    }

    /// Stops recording. Tasks abandoned by a finished job keep running
    /// until their next await point and must not write to its history.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl ProgressReporter for JournalProgress {
    fn report(&self, entry: ProcessingLogEntry) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.store.append_log(&self.job_id, &entry) {
            warn!(job_id = %self.job_id, error = %e, "Failed to append processing log");
        }

        let live = !matches!(
            entry.stage,
            ProcessingStage::Queued | ProcessingStage::Recovered
        );
        if live {
            if let Err(e) = self.store.update_processing_state(
                &self.job_id,
                entry.file_name.as_deref(),
                Some(entry.stage.as_str()),
                Some(&entry.message),
            ) {
                warn!(job_id = %self.job_id, error = %e, "Failed to update processing state");
            }
        }

        if let Some(tracker) = &self.tracker {
            tracker.entry(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobProgressBroadcaster;
    use crate::db::Database;
    use crate::job::{JobStatus, NewJob};
    use crate::store::SqliteJobStore;
    use chrono::Utc;

    fn store_with_job() -> Arc<dyn JobStore> {
        let store = SqliteJobStore::new(Database::open_in_memory().unwrap());
        store
            .create_job(&NewJob {
                job_id: "job-1".to_string(),
                owner: "alice".to_string(),
                total_files: 2,
                endpoint: "http://store.example/ds".to_string(),
                graph: "urn:g".to_string(),
                job_dir: "/tmp/job-1".into(),
                start_time: Utc::now(),
            })
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_journal_persists_and_broadcasts() {
        let store = store_with_job();
        store
            .update_status("job-1", JobStatus::Running, None, None)
            .unwrap();
        let broadcaster = JobProgressBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();
        let journal = JournalProgress::new(store.clone(), "job-1", Some(broadcaster.track("job-1")));

        journal.report(ProcessingLogEntry::for_file(
            "a.ttl",
            ProcessingStage::Uploading,
            "Uploading a.ttl",
            1,
            2,
        ));

        let logs = store.get_logs("job-1").unwrap();
        assert_eq!(logs.last().unwrap().stage, ProcessingStage::Uploading);

        let job = store.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.current_file.as_deref(), Some("a.ttl"));
        assert_eq!(job.current_stage.as_deref(), Some("uploading"));

        assert_eq!(rx.try_recv().unwrap().file_name.as_deref(), Some("a.ttl"));
    }

    #[test]
    fn test_journal_tolerates_missing_job() {
        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(Database::open_in_memory().unwrap()));
        let journal = JournalProgress::new(store, "missing", None);
        journal.report(ProcessingLogEntry::job_level(
            ProcessingStage::Processing,
            "never persisted",
        ));
    }

    #[test]
    fn test_closed_journal_drops_entries() {
        let store = store_with_job();
        let journal = JournalProgress::new(store.clone(), "job-1", None);
        journal.report(ProcessingLogEntry::job_level(ProcessingStage::Processing, "kept"));
        journal.close();
        journal.report(ProcessingLogEntry::for_file(
            "a.ttl",
            ProcessingStage::Uploading,
            "Uploading a.ttl",
            1,
            2,
        ));

        let logs = store.get_logs("job-1").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "kept");
        let job = store.get_job("job-1").unwrap().unwrap();
        assert!(job.current_file.is_none());
    }

    #[test]
    fn test_recording_progress() {
        let recorder = RecordingProgress::default();
        recorder.report(ProcessingLogEntry::job_level(ProcessingStage::Queued, "q"));
        assert_eq!(recorder.entries().len(), 1);
    }
}
