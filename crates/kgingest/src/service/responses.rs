use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{
    EffectiveStatus, FailedFile, FileResult, Job, JobStatus, JobSummary, ProcessingLogEntry,
};
use crate::sanitize::redact_endpoint;

#[derive(Debug, Clone, Serialize)]
pub struct RawSubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub detected_format: String,
    pub size: u64,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreFailedFile {
    pub file_name: String,
    pub http_status: u16,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub total_files: u32,
    pub accepted_files: u32,
    pub pre_failed_files: Vec<PreFailedFile>,
    pub concurrency: usize,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListItem {
    pub job_id: String,
    pub status: JobStatus,
    pub effective_status: EffectiveStatus,
    pub progress_percent: f64,
    pub total_files: u32,
    pub processed_files: u32,
    pub success_count: u32,
    pub fail_count: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub graph: String,
    pub status_url: String,
}

impl JobListItem {
    pub fn from_job(job: &Job, status_url: String) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            effective_status: job.effective_status(),
            progress_percent: job.progress_percent(),
            total_files: job.total_files,
            processed_files: job.processed_files,
            success_count: job.success_count,
            fail_count: job.fail_count,
            start_time: job.start_time,
            end_time: job.end_time,
            graph: job.graph.clone(),
            status_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobListItem>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    pub job_id: String,
    pub owner: String,
    pub status: JobStatus,
    pub effective_status: EffectiveStatus,
    pub progress_percent: f64,
    pub total_files: u32,
    pub processed_files: u32,
    pub success_count: u32,
    pub fail_count: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub estimated_seconds_remaining: Option<f64>,
    pub graph: String,
    /// Credentials and query string removed.
    pub endpoint: String,
    pub current_file: Option<String>,
    pub current_stage: Option<String>,
    pub status_message: Option<String>,
    pub unrecoverable: bool,
    pub unrecoverable_reason: Option<String>,
    pub history: Vec<ProcessingLogEntry>,
    pub summary: JobSummary,
    pub failed_files: Vec<FailedFile>,
    pub results: Vec<FileResult>,
}

impl JobDetail {
    pub fn build(
        job: Job,
        results: Vec<FileResult>,
        history: Vec<ProcessingLogEntry>,
        now: DateTime<Utc>,
    ) -> Self {
        let summary = JobSummary::from_results(&results);
        let duration_seconds = job
            .end_time
            .map(|end| (end - job.start_time).num_milliseconds() as f64 / 1000.0);
        Self {
            effective_status: job.effective_status(),
            progress_percent: job.progress_percent(),
            estimated_seconds_remaining: job.estimated_seconds_remaining(now),
            duration_seconds,
            endpoint: redact_endpoint(&job.endpoint),
            failed_files: summary.failures.clone(),
            summary,
            history,
            results,
            job_id: job.job_id,
            owner: job.owner,
            status: job.status,
            total_files: job.total_files,
            processed_files: job.processed_files,
            success_count: job.success_count,
            fail_count: job.fail_count,
            start_time: job.start_time,
            end_time: job.end_time,
            graph: job.graph,
            current_file: job.current_file,
            current_stage: job.current_stage,
            status_message: job.status_message,
            unrecoverable: job.unrecoverable,
            unrecoverable_reason: job.unrecoverable_reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterGraphResponse {
    pub iri: String,
    pub newly_registered: bool,
}
