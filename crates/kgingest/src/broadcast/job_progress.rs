//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobStatus, ProcessingLogEntry, ProcessingStage};

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Job identifier.
    pub job_id: String,
    /// File the event concerns; `None` for job-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub stage: ProcessingStage,
    /// Persisted job status, set on status transitions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u32>,
}

impl JobProgressEvent {
    /// Mirrors a processing-log entry.
    pub fn from_entry(job_id: &str, entry: &ProcessingLogEntry) -> Self {
        Self {
            job_id: job_id.to_string(),
            file_name: entry.file_name.clone(),
            stage: entry.stage,
            status: None,
            message: entry.message.clone(),
            timestamp: entry.timestamp,
            file_index: entry.file_index,
            total_files: entry.total_files,
        }
    }

    /// A persisted status transition.
    pub fn status_changed(
        job_id: &str,
        status: JobStatus,
        stage: ProcessingStage,
        message: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            file_name: None,
            stage,
            status: Some(status),
            message: message.to_string(),
            timestamp: Utc::now(),
            file_index: None,
            total_files: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one job.
    pub fn track(&self, job_id: &str) -> JobProgressTracker {
        JobProgressTracker::new(job_id, Arc::clone(&self.sender))
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Tracks progress for a single job.
#[derive(Clone)]
pub struct JobProgressTracker {
    job_id: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job_id: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            job_id: job_id.to_string(),
            sender,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn entry(&self, entry: &ProcessingLogEntry) {
        let _ = self
            .sender
            .send(JobProgressEvent::from_entry(&self.job_id, entry));
    }

    pub fn status_changed(&self, status: JobStatus, stage: ProcessingStage, message: &str) {
        let _ = self.sender.send(JobProgressEvent::status_changed(
            &self.job_id,
            status,
            stage,
            message,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers_is_ignored() {
        let broadcaster = JobProgressBroadcaster::new(4);
        broadcaster.send(JobProgressEvent::status_changed(
            "job-1",
            JobStatus::Running,
            ProcessingStage::Processing,
            "started",
        ));
    }

    #[test]
    fn test_tracker_mirrors_log_entries() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.track("job-1");

        tracker.entry(&ProcessingLogEntry::for_file(
            "a.ttl",
            ProcessingStage::Uploading,
            "Uploading a.ttl",
            1,
            3,
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.file_name.as_deref(), Some("a.ttl"));
        assert_eq!(received.stage, ProcessingStage::Uploading);
        assert_eq!(received.file_index, Some(1));
        assert_eq!(received.total_files, Some(3));
        assert!(!received.is_terminal());
    }

    #[test]
    fn test_status_change_is_terminal() {
        let broadcaster = JobProgressBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        broadcaster
            .track("job-2")
            .status_changed(JobStatus::Done, ProcessingStage::Completed, "done");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, Some(JobStatus::Done));
        assert!(received.is_terminal());
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::from_entry(
            "job-3",
            &ProcessingLogEntry::job_level(ProcessingStage::Queued, "queued"),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "job-3");
        assert_eq!(json["stage"], "queued");
        assert!(json.get("fileName").is_none());
    }
}
