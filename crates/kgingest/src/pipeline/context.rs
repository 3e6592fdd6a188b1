use std::path::PathBuf;

use crate::format::{extension_of, Detected};

use super::error::PipelineWarning;

pub struct FileContext {
    // Input
    pub job_id: String,
    pub source_path: PathBuf,
    pub file_name: String,
    /// 1-based position within the job.
    pub index: u32,
    pub total: u32,

    // Set by the detect step
    pub size: u64,
    pub detected: Option<Detected>,

    // Set by the provenance step; `None` uploads the source as-is
    pub augmented_path: Option<PathBuf>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl FileContext {
    pub fn new(job_id: &str, source_path: PathBuf, index: u32, total: u32) -> Self {
        let file_name = crate::sanitize::redact_path(&source_path);
        Self {
            job_id: job_id.to_string(),
            source_path,
            file_name,
            index,
            total,
            size: 0,
            detected: None,
            augmented_path: None,
            warnings: Vec::new(),
        }
    }

    /// The file that is actually sent.
    pub fn upload_path(&self) -> &PathBuf {
        self.augmented_path.as_ref().unwrap_or(&self.source_path)
    }

    /// Format extension if detected, otherwise the file's own extension.
    pub fn ext(&self) -> String {
        self.detected
            .and_then(|d| d.format())
            .map(|f| f.extension().to_string())
            .unwrap_or_else(|| extension_of(&self.file_name))
    }
}
