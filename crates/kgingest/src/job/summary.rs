//! Derived per-job summary computed from file results. Never persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FileResult;
use crate::recovery::RECOVERY_RESULT_NAME;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtensionBreakdown {
    pub files: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub bytes: u64,
}

/// Simplified view of a failed file for callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedFile {
    pub file_name: String,
    pub http_status: u16,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub total_results: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub min_file_bytes: Option<u64>,
    pub max_file_bytes: Option<u64>,
    pub total_elapsed_s: f64,
    /// Successfully uploaded bytes over summed upload time.
    pub aggregate_bps: f64,
    pub by_extension: BTreeMap<String, ExtensionBreakdown>,
    pub failures: Vec<FailedFile>,
    /// Explanation left by crash recovery. Not a file, so it stays out of
    /// every count above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_note: Option<String>,
}

impl JobSummary {
    pub fn from_results(results: &[FileResult]) -> Self {
        let mut summary = JobSummary::default();

        for result in results {
            if result.file_name == RECOVERY_RESULT_NAME {
                summary.recovery_note = Some(result.response_body.clone());
                continue;
            }
            summary.total_results += 1;
            summary.total_bytes += result.size_bytes;
            summary.total_elapsed_s += result.elapsed_s;
            summary.min_file_bytes = Some(
                summary
                    .min_file_bytes
                    .map_or(result.size_bytes, |m| m.min(result.size_bytes)),
            );
            summary.max_file_bytes = Some(
                summary
                    .max_file_bytes
                    .map_or(result.size_bytes, |m| m.max(result.size_bytes)),
            );

            let ext = summary.by_extension.entry(result.ext.clone()).or_default();
            ext.files += 1;
            ext.bytes += result.size_bytes;

            if result.success {
                summary.succeeded += 1;
                summary.uploaded_bytes += result.size_bytes;
                ext.succeeded += 1;
            } else {
                summary.failed += 1;
                ext.failed += 1;
                summary.failures.push(FailedFile {
                    file_name: result.file_name.clone(),
                    http_status: result.http_status,
                    message: result.response_body.clone(),
                });
            }
        }

        if summary.total_elapsed_s > 0.0 {
            summary.aggregate_bps = summary.uploaded_bytes as f64 / summary.total_elapsed_s;
        }
        summary
    }
}
