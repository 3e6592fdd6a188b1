//! Typed job records: jobs, per-file results and the processing log.

pub mod summary;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub use summary::{ExtensionBreakdown, FailedFile, JobSummary};

/// Formats a timestamp the way it is persisted: RFC 3339, UTC, microseconds.
///
/// The width is fixed so that string comparison orders timestamps chronologically.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a persisted timestamp.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Persisted job status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("Invalid job status: {}", other)),
        }
    }
}

/// Reporting status: `done` refined by the success/fail counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Pending,
    Running,
    Done,
    Partial,
    Failed,
    Error,
}

impl EffectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveStatus::Pending => "pending",
            EffectiveStatus::Running => "running",
            EffectiveStatus::Done => "done",
            EffectiveStatus::Partial => "partial",
            EffectiveStatus::Failed => "failed",
            EffectiveStatus::Error => "error",
        }
    }
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of a job or of one of its files, as recorded in the processing log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Queued,
    Processing,
    Provenance,
    Uploading,
    Completed,
    Failed,
    Finalizing,
    Recovered,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Queued => "queued",
            ProcessingStage::Processing => "processing",
            ProcessingStage::Provenance => "provenance",
            ProcessingStage::Uploading => "uploading",
            ProcessingStage::Completed => "completed",
            ProcessingStage::Failed => "failed",
            ProcessingStage::Finalizing => "finalizing",
            ProcessingStage::Recovered => "recovered",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ProcessingStage::Queued),
            "processing" => Ok(ProcessingStage::Processing),
            "provenance" => Ok(ProcessingStage::Provenance),
            "uploading" => Ok(ProcessingStage::Uploading),
            "completed" => Ok(ProcessingStage::Completed),
            "failed" => Ok(ProcessingStage::Failed),
            "finalizing" => Ok(ProcessingStage::Finalizing),
            "recovered" => Ok(ProcessingStage::Recovered),
            other => Err(format!("Invalid processing stage: {}", other)),
        }
    }
}

/// One ingestion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub owner: String,
    pub status: JobStatus,
    pub total_files: u32,
    pub processed_files: u32,
    pub success_count: u32,
    pub fail_count: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Target named-graph IRI.
    pub graph: String,
    /// Target graph-store endpoint URL.
    pub endpoint: String,
    pub job_dir: PathBuf,
    pub current_file: Option<String>,
    pub current_stage: Option<String>,
    pub status_message: Option<String>,
    pub unrecoverable: bool,
    pub unrecoverable_reason: Option<String>,
}

impl Job {
    pub fn effective_status(&self) -> EffectiveStatus {
        match self.status {
            JobStatus::Pending => EffectiveStatus::Pending,
            JobStatus::Running => EffectiveStatus::Running,
            JobStatus::Error => EffectiveStatus::Error,
            JobStatus::Done => {
                if self.fail_count == 0 {
                    EffectiveStatus::Done
                } else if self.success_count == 0 {
                    EffectiveStatus::Failed
                } else {
                    EffectiveStatus::Partial
                }
            }
        }
    }

    /// Percentage of files processed, 0.0..=100.0.
    pub fn progress_percent(&self) -> f64 {
        if self.total_files == 0 {
            return if self.status.is_terminal() { 100.0 } else { 0.0 };
        }
        let pct = f64::from(self.processed_files) * 100.0 / f64::from(self.total_files);
        (pct * 100.0).round() / 100.0
    }

    /// Seconds since the job started, measured against `now`.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_seconds()
    }

    /// Linear estimate of the remaining time while running.
    pub fn estimated_seconds_remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.status != JobStatus::Running || self.processed_files == 0 {
            return None;
        }
        let elapsed = (now - self.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let per_file = elapsed / f64::from(self.processed_files);
        let remaining = self.total_files.saturating_sub(self.processed_files);
        Some(per_file * f64::from(remaining))
    }
}

/// Parameters for creating a job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub owner: String,
    pub total_files: u32,
    pub endpoint: String,
    pub graph: String,
    pub job_dir: PathBuf,
    pub start_time: DateTime<Utc>,
}

/// Outcome of one file's upload attempt. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileResult {
    pub file_name: String,
    /// Detected extension or format tag.
    pub ext: String,
    pub size_bytes: u64,
    pub elapsed_s: f64,
    /// Remote HTTP status; 0 when no response was received.
    pub http_status: u16,
    pub success: bool,
    /// Effective throughput in bytes per second.
    pub bps: f64,
    /// Response body, truncated for diagnostics.
    pub response_body: String,
}

impl FileResult {
    /// A file rejected before any processing (unsupported extension, oversized).
    pub fn pre_failed(
        file_name: &str,
        ext: &str,
        size_bytes: u64,
        http_status: u16,
        message: &str,
    ) -> Self {
        Self {
            file_name: file_name.to_string(),
            ext: ext.to_string(),
            size_bytes,
            elapsed_s: 0.0,
            http_status,
            success: false,
            bps: 0.0,
            response_body: message.to_string(),
        }
    }

    /// A file that failed locally (parse error, I/O) before or instead of uploading.
    pub fn local_failure(file_name: &str, ext: &str, size_bytes: u64, message: &str) -> Self {
        Self::pre_failed(file_name, ext, size_bytes, 0, message)
    }
}

/// Truncates a response body to at most `limit` characters.
pub fn truncate_body(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

/// Append-only audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingLogEntry {
    pub file_name: Option<String>,
    pub stage: ProcessingStage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub file_index: Option<u32>,
    pub total_files: Option<u32>,
}

impl ProcessingLogEntry {
    pub fn job_level(stage: ProcessingStage, message: impl Into<String>) -> Self {
        Self {
            file_name: None,
            stage,
            message: message.into(),
            timestamp: Utc::now(),
            file_index: None,
            total_files: None,
        }
    }

    pub fn for_file(
        file_name: &str,
        stage: ProcessingStage,
        message: impl Into<String>,
        file_index: u32,
        total_files: u32,
    ) -> Self {
        Self {
            file_name: Some(file_name.to_string()),
            stage,
            message: message.into(),
            timestamp: Utc::now(),
            file_index: Some(file_index),
            total_files: Some(total_files),
        }
    }
}
