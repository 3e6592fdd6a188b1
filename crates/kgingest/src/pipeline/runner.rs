use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, warn, Instrument};

use crate::chunker::{spawn_file_chunker, CHUNK_CONTENT_TYPE};
use crate::format::{detect_file, Detected, RdfFormat};
use crate::job::{FileResult, ProcessingLogEntry, ProcessingStage};
use crate::provenance::{attach_to_file, AttachMode};
use crate::uploader::{Payload, UploadOutcome, Uploader};

use super::config::PipelineConfig;
use super::context::FileContext;
use super::error::{PipelineError, PipelineWarning};
use super::progress::ProgressReporter;

/// Result of driving one file through the pipeline. Failures are values.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Uploaded(FileResult),
    Failed(FileResult),
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Uploaded(_))
    }

    pub fn result(&self) -> &FileResult {
        match self {
            FileOutcome::Uploaded(r) | FileOutcome::Failed(r) => r,
        }
    }

    pub fn into_result(self) -> FileResult {
        match self {
            FileOutcome::Uploaded(r) | FileOutcome::Failed(r) => r,
        }
    }
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    uploader: Arc<dyn Uploader>,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, uploader: Arc<dyn Uploader>) -> Self {
        Self { config, uploader }
    }

    /// Detect, attach provenance, upload. Never fails: every error ends up
    /// in a failed [`FileResult`].
    pub async fn run(&self, mut ctx: FileContext, progress: &dyn ProgressReporter) -> FileOutcome {
        let span = info_span!("file",
            job_id = %ctx.job_id,
            file = %ctx.file_name,
            index = ctx.index,
            total = ctx.total,
        );

        async {
            self.report(&ctx, progress, ProcessingStage::Processing, format!(
                "Processing {} ({}/{})",
                ctx.file_name, ctx.index, ctx.total
            ));

            let outcome = match self.process(&mut ctx, progress).await {
                Ok(upload) => self.to_outcome(&ctx, upload),
                Err(e) => {
                    warn!(error = %e, "File processing failed");
                    FileOutcome::Failed(FileResult::local_failure(
                        &ctx.file_name,
                        &ctx.ext(),
                        ctx.size,
                        &e.to_string(),
                    ))
                }
            };

            let result = outcome.result();
            if outcome.is_success() {
                self.report(&ctx, progress, ProcessingStage::Completed, format!(
                    "Uploaded {} (HTTP {}, {:.2}s)",
                    ctx.file_name, result.http_status, result.elapsed_s
                ));
            } else {
                self.report(&ctx, progress, ProcessingStage::Failed, format!(
                    "Failed {} (HTTP {}): {}",
                    ctx.file_name, result.http_status, result.response_body
                ));
            }

            self.discard_intermediate(&mut ctx).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        ctx: &mut FileContext,
        progress: &dyn ProgressReporter,
    ) -> Result<UploadOutcome, PipelineError> {
        self.step_detect(ctx).await?;
        self.step_provenance(ctx, progress).await?;
        self.step_upload(ctx, progress).await
    }

    async fn step_detect(&self, ctx: &mut FileContext) -> Result<(), PipelineError> {
        let path = ctx.source_path.clone();
        let (size, detected) = tokio::task::spawn_blocking(move || {
            let size = std::fs::metadata(&path)?.len();
            detect_file(&path).map(|d| (size, d))
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))??;
        ctx.size = size;
        ctx.detected = Some(detected);
        debug!(size, content_type = detected.content_type(), "Detected format");
        Ok(())
    }

    async fn step_provenance(
        &self,
        ctx: &mut FileContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let format = match ctx.detected {
            Some(Detected::Rdf(format)) => format,
            _ => return Ok(()),
        };
        if self.config.skip_provenance {
            ctx.warnings.push(PipelineWarning::ProvenanceSkipped);
            return Ok(());
        }

        self.report(ctx, progress, ProcessingStage::Provenance, format!(
            "Attaching provenance to {}",
            ctx.file_name
        ));

        let source = ctx.source_path.clone();
        let dest = self
            .config
            .work_dir
            .join(format!("{:05}-{}", ctx.index, ctx.file_name));
        let owner = self.config.owner.clone();
        let options = self.config.provenance.clone();
        let mode = {
            let dest = dest.clone();
            tokio::task::spawn_blocking(move || {
                attach_to_file(&source, &dest, format, &owner, &options)
            })
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??
        };

        match mode {
            AttachMode::PassedThrough(reason) => {
                warn!(reason = %reason, "Uploading without provenance");
                ctx.warnings.push(PipelineWarning::ProvenancePassedThrough(reason));
            }
            attached => {
                debug!(mode = ?attached, "Provenance attached");
                ctx.augmented_path = Some(dest);
            }
        }
        Ok(())
    }

    async fn step_upload(
        &self,
        ctx: &mut FileContext,
        progress: &dyn ProgressReporter,
    ) -> Result<UploadOutcome, PipelineError> {
        let path = ctx.upload_path().clone();
        let size = tokio::fs::metadata(&path).await?.len();
        let detected = ctx.detected.unwrap_or(Detected::Binary(None));

        let chunk_format = match detected {
            Detected::Rdf(format)
                if self.config.chunking.enabled
                    && size > self.config.chunking.threshold_bytes
                    && format.to_oxrdfio().is_some() =>
            {
                Some(format)
            }
            _ => None,
        };

        if let Some(format) = chunk_format {
            self.report(ctx, progress, ProcessingStage::Uploading, format!(
                "Uploading {} in chunks ({} bytes)",
                ctx.file_name, size
            ));
            if let Some(outcome) = self.upload_chunked(path.clone(), format, size).await? {
                return Ok(outcome);
            }
        } else {
            self.report(ctx, progress, ProcessingStage::Uploading, format!(
                "Uploading {} ({} bytes)",
                ctx.file_name, size
            ));
        }

        Ok(self
            .uploader
            .upload(
                Payload::File { path, size },
                detected.content_type(),
                &self.config.target,
                self.config.credentials.as_ref(),
            )
            .await)
    }

    /// Uploads fragments one at a time, stopping at the first rejected one.
    /// `None` when the document produced no fragments.
    async fn upload_chunked(
        &self,
        path: std::path::PathBuf,
        format: RdfFormat,
        size: u64,
    ) -> Result<Option<UploadOutcome>, PipelineError> {
        let max_quads = self.config.chunking.plan().max_quads_for(size);
        let (mut rx, handle) = spawn_file_chunker(
            path,
            format,
            self.config.target.graph.clone(),
            max_quads,
            self.config.chunking.channel_capacity,
        );

        let mut total = UploadOutcome {
            http_status: 0,
            elapsed: Duration::ZERO,
            success: true,
            bytes: 0,
            response_body: String::new(),
        };
        let mut uploaded = 0usize;

        while let Some(chunk) = rx.recv().await {
            let index = chunk.index;
            let outcome = self
                .uploader
                .upload(
                    Payload::Bytes(chunk.payload),
                    CHUNK_CONTENT_TYPE,
                    &self.config.target,
                    self.config.credentials.as_ref(),
                )
                .await;
            total.elapsed += outcome.elapsed;
            total.bytes += outcome.bytes;
            total.http_status = outcome.http_status;
            uploaded += 1;
            if !outcome.success {
                total.success = false;
                total.response_body = format!("Chunk {} rejected: {}", index, outcome.response_body);
                break;
            }
        }
        // Stops the parser if we bailed out early.
        drop(rx);

        let stats = handle
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;
        debug!(chunks = uploaded, quads = stats.quads, max_quads, "Chunked upload finished");

        if stats.chunks == 0 {
            return Ok(None);
        }
        if total.success {
            total.response_body = format!("{} chunks, {} triples", stats.chunks, stats.quads);
        }
        Ok(Some(total))
    }

    fn to_outcome(&self, ctx: &FileContext, upload: UploadOutcome) -> FileOutcome {
        let result = FileResult {
            file_name: ctx.file_name.clone(),
            ext: ctx.ext(),
            size_bytes: ctx.size,
            elapsed_s: upload.elapsed.as_secs_f64(),
            http_status: upload.http_status,
            success: upload.success,
            bps: upload.throughput(),
            response_body: upload.response_body,
        };
        if result.success {
            FileOutcome::Uploaded(result)
        } else {
            FileOutcome::Failed(result)
        }
    }

    async fn discard_intermediate(&self, ctx: &mut FileContext) {
        let Some(path) = ctx.augmented_path.take() else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove intermediate file");
                ctx.warnings.push(PipelineWarning::IntermediateNotRemoved {
                    path: crate::sanitize::redact_path(&path),
                    error: e.to_string(),
                });
            }
        }
    }

    fn report(
        &self,
        ctx: &FileContext,
        progress: &dyn ProgressReporter,
        stage: ProcessingStage,
        message: String,
    ) {
        progress.report(ProcessingLogEntry::for_file(
            &ctx.file_name,
            stage,
            message,
            ctx.index,
            ctx.total,
        ));
    }
}
