//! Reclaims jobs left `running` by a process that died.
//!
//! Recovery is check-then-act. A job is only reclaimed while its age since
//! `start_time` lies inside the configured window; the lower bound keeps
//! live jobs out of reach. Rejections that can never change (terminal, too
//! old) are persisted as the `unrecoverable` flag so repeated requests
//! short-circuit on the stored reason.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::broadcast::JobProgressBroadcaster;
use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::job::{FileResult, Job, JobStatus, ProcessingLogEntry, ProcessingStage};
use crate::store::JobStore;

/// File name of the synthetic result recorded for a recovered job.
pub const RECOVERY_RESULT_NAME: &str = "(job recovery)";

/// Age bounds, measured from `start_time`, within which a running job is
/// considered orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryWindow {
    pub min_age: Duration,
    pub max_age: Duration,
}

impl RecoveryWindow {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            min_age: Duration::seconds(config.min_age_secs as i64),
            max_age: Duration::seconds(config.max_age_secs as i64),
        }
    }
}

impl Default for RecoveryWindow {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecoverabilityCheck {
    pub job_id: String,
    pub recoverable: bool,
    pub reason: String,
    pub status: JobStatus,
    pub age_seconds: i64,
    /// Set when this rejection (or an earlier one) is permanent.
    pub unrecoverable: bool,
}

/// Which running jobs a recovery request covers.
#[derive(Debug, Clone, Copy)]
pub enum RecoveryTarget<'a> {
    Job { job_id: &'a str, owner: &'a str },
    Owner(&'a str),
    All,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedJob {
    pub job_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RecoveryReport {
    pub recovered: Vec<String>,
    pub skipped: Vec<SkippedJob>,
}

impl RecoveryReport {
    pub fn recovered_count(&self) -> usize {
        self.recovered.len()
    }
}

enum Verdict {
    Recoverable(String),
    /// May become recoverable later.
    NotYet(String),
    Never(String),
}

pub struct RecoveryManager {
    store: Arc<dyn JobStore>,
    window: RecoveryWindow,
    broadcaster: Option<JobProgressBroadcaster>,
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn JobStore>, window: RecoveryWindow) -> Self {
        Self {
            store,
            window,
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: JobProgressBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn window(&self) -> RecoveryWindow {
        self.window
    }

    /// Decides whether `owner`'s job may be recovered under `window`
    /// (the manager's default when `None`).
    ///
    /// Permanent rejections mark the job unrecoverable. A job the caller
    /// does not own is reported as not found and left untouched.
    pub fn check_recoverable(
        &self,
        job_id: &str,
        owner: &str,
        window: Option<RecoveryWindow>,
    ) -> Result<RecoverabilityCheck, RecoveryError> {
        let window = window.unwrap_or(self.window);
        let job = self
            .store
            .get_job_for_owner(job_id, owner)?
            .ok_or_else(|| RecoveryError::JobNotFound(job_id.to_string()))?;
        let age_seconds = job.age_seconds(Utc::now());

        if job.unrecoverable {
            return Ok(RecoverabilityCheck {
                job_id: job.job_id,
                recoverable: false,
                reason: job
                    .unrecoverable_reason
                    .unwrap_or_else(|| "Job is marked unrecoverable".to_string()),
                status: job.status,
                age_seconds,
                unrecoverable: true,
            });
        }

        let (recoverable, reason, unrecoverable) = match verdict(&job, age_seconds, window) {
            Verdict::Recoverable(reason) => (true, reason, false),
            Verdict::NotYet(reason) => (false, reason, false),
            Verdict::Never(reason) => {
                self.store.mark_unrecoverable(&job.job_id, &reason)?;
                info!(job_id = %job.job_id, reason = %reason, "Job marked unrecoverable");
                (false, reason, true)
            }
        };

        Ok(RecoverabilityCheck {
            job_id: job.job_id,
            recoverable,
            reason,
            status: job.status,
            age_seconds,
            unrecoverable,
        })
    }

    /// Transitions the stale running jobs covered by `target` to `error`.
    ///
    /// A single job is checked first and skipped with the check's reason
    /// when not recoverable.
    pub fn recover(
        &self,
        target: RecoveryTarget<'_>,
        window: Option<RecoveryWindow>,
    ) -> Result<RecoveryReport, RecoveryError> {
        let window = window.unwrap_or(self.window);
        let mut report = RecoveryReport::default();

        let candidates = match target {
            RecoveryTarget::Job { job_id, owner } => {
                let check = self.check_recoverable(job_id, owner, Some(window))?;
                if !check.recoverable {
                    report.skipped.push(SkippedJob {
                        job_id: check.job_id,
                        reason: check.reason,
                    });
                    return Ok(report);
                }
                self.store.find_stale_running_jobs(
                    window.min_age,
                    window.max_age,
                    Some(owner),
                    Some(job_id),
                )?
            }
            RecoveryTarget::Owner(owner) => self.store.find_stale_running_jobs(
                window.min_age,
                window.max_age,
                Some(owner),
                None,
            )?,
            RecoveryTarget::All => {
                self.store
                    .find_stale_running_jobs(window.min_age, window.max_age, None, None)?
            }
        };

        for job in candidates {
            if self.recover_one(&job)? {
                report.recovered.push(job.job_id);
            } else {
                report.skipped.push(SkippedJob {
                    job_id: job.job_id,
                    reason: "Job reached a terminal state before recovery".to_string(),
                });
            }
        }

        if !report.recovered.is_empty() {
            info!(recovered = report.recovered.len(), "Recovered stale jobs");
        }
        Ok(report)
    }

    /// Bulk recovery across every owner with the default window.
    pub fn sweep(&self) -> Result<RecoveryReport, RecoveryError> {
        self.recover(RecoveryTarget::All, None)
    }

    fn recover_one(&self, job: &Job) -> Result<bool, RecoveryError> {
        let age = job.age_seconds(Utc::now());
        let message = format!(
            "Recovered after {} without finishing; presumed orphaned by a server crash, restart or stall",
            human_duration(age)
        );
        let explanation = format!(
            "{}. Progress at recovery: {} of {} files processed ({} succeeded, {} failed); last stage: {}; last file: {}",
            message,
            job.processed_files,
            job.total_files,
            job.success_count,
            job.fail_count,
            job.current_stage.as_deref().unwrap_or("unknown"),
            job.current_file.as_deref().unwrap_or("none"),
        );
        let result = FileResult::pre_failed(RECOVERY_RESULT_NAME, "", 0, 0, &explanation);

        let applied = self.store.recover_job(&job.job_id, &message, &result)?;
        if !applied {
            warn!(job_id = %job.job_id, "Job finished before it could be recovered");
            return Ok(false);
        }

        if let Err(e) = self.store.append_log(
            &job.job_id,
            &ProcessingLogEntry::job_level(ProcessingStage::Recovered, explanation),
        ) {
            warn!(job_id = %job.job_id, error = %e, "Failed to append recovery log");
        }
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster
                .track(&job.job_id)
                .status_changed(JobStatus::Error, ProcessingStage::Recovered, &message);
        }
        info!(job_id = %job.job_id, age_seconds = age, "Job recovered");
        Ok(true)
    }
}

fn verdict(job: &Job, age_seconds: i64, window: RecoveryWindow) -> Verdict {
    match job.status {
        JobStatus::Done | JobStatus::Error => {
            return Verdict::Never(format!("Job already finished with status '{}'", job.status));
        }
        JobStatus::Pending => {
            return Verdict::NotYet("Job has not started running yet".to_string());
        }
        JobStatus::Running => {}
    }

    let min = window.min_age.num_seconds();
    let max = window.max_age.num_seconds();
    if age_seconds < min {
        Verdict::NotYet(format!(
            "Job is younger than the minimum age of {} for recovery (running for {})",
            human_duration(min),
            human_duration(age_seconds)
        ))
    } else if age_seconds > max {
        Verdict::Never(format!(
            "Job is older than the maximum recovery age of {}",
            human_duration(max)
        ))
    } else {
        Verdict::Recoverable(format!(
            "Job has been running for {} without finishing",
            human_duration(age_seconds)
        ))
    }
}

fn human_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h >= 48 {
        format!("{}d {}h", h / 24, h % 24)
    } else if h > 0 {
        format!("{}h {}m", h, m)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}
