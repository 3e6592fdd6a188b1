//! The external interfaces of the engine: submission, job queries,
//! recovery and named-graph registration.
//!
//! Submission only validates and stages files, then hands the job to the
//! orchestrator in the background; it never waits for ingestion.

mod responses;

pub use responses::{
    BatchSubmitResponse, JobDetail, JobListItem, JobListResponse, PreFailedFile,
    RawSubmitResponse, RegisterGraphResponse,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::IngestConfig;
use crate::db::{default_database_path, Database, DatabaseError};
use crate::error::{ConfigError, IngestError, RecoveryError, StoreError, SubmitError};
use crate::format::{detect_text, extension_of, is_supported_extension};
use crate::job::{FileResult, JobStatus, NewJob, ProcessingLogEntry, ProcessingStage};
use crate::recovery::{
    RecoverabilityCheck, RecoveryManager, RecoveryReport, RecoveryTarget, RecoveryWindow,
};
use crate::registry::{normalize_iri, GraphRegistry, NamedGraph, SqliteGraphRegistry};
use crate::sanitize::redact_path;
use crate::store::{JobListFilter, JobStore, SqliteJobStore};
use crate::uploader::{Credentials, HttpUploader, Uploader};
use crate::worker::{Orchestrator, RunOptions};

/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// A raw text payload.
#[derive(Debug, Clone)]
pub struct RawSubmission {
    pub owner: String,
    /// Falls back to the configured default graph.
    pub graph: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub enum FileSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Client-supplied name; only its final component is kept.
    pub name: String,
    pub source: FileSource,
}

impl IncomingFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: redact_path(&path),
            source: FileSource::Path(path),
        }
    }

    pub fn from_bytes(name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            source: FileSource::Bytes(bytes.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileBatchSubmission {
    pub owner: String,
    pub graph: Option<String>,
    pub concurrency: Option<usize>,
    pub skip_provenance: bool,
    pub files: Vec<IncomingFile>,
}

pub struct IngestService {
    config: Arc<IngestConfig>,
    store: Arc<dyn JobStore>,
    registry: Arc<dyn GraphRegistry>,
    orchestrator: Arc<Orchestrator>,
    recovery: RecoveryManager,
    broadcaster: JobProgressBroadcaster,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl IngestService {
    /// Production constructor: opens the database and builds the HTTP
    /// uploader from `config`.
    pub fn open(config: IngestConfig) -> Result<Self, IngestError> {
        let db_path = match &config.database_path {
            Some(path) => path.clone(),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "Could not determine a home directory; set database_path".to_string(),
            })?,
        };
        let db = Database::open(&db_path)?;
        let uploader = HttpUploader::new(
            Some(config.graph_store.connect_timeout()),
            Some(config.graph_store.request_timeout()),
            config.limits.upload_streaming_threshold,
            config.limits.response_body_limit,
        )?;
        Self::new(
            config,
            Arc::new(SqliteJobStore::new(db.clone())),
            Arc::new(SqliteGraphRegistry::new(db)),
            Arc::new(uploader),
        )
    }

    /// Wires the engine from explicit collaborators.
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn JobStore>,
        registry: Arc<dyn GraphRegistry>,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self, IngestError> {
        let credentials = resolve_credentials(&config)?;
        let config = Arc::new(config);
        let broadcaster = JobProgressBroadcaster::default();
        let orchestrator = Arc::new(
            Orchestrator::new(
                Arc::clone(&store),
                uploader,
                Arc::clone(&config),
                credentials,
            )
            .with_broadcaster(broadcaster.clone()),
        );
        let recovery = RecoveryManager::new(
            Arc::clone(&store),
            RecoveryWindow::from_config(&config.recovery),
        )
        .with_broadcaster(broadcaster.clone());

        Ok(Self {
            config,
            store,
            registry,
            orchestrator,
            recovery,
            broadcaster,
            running: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Runs the startup recovery sweep when configured.
    pub fn startup(&self) -> Result<Option<RecoveryReport>, RecoveryError> {
        if !self.config.recovery.on_startup {
            return Ok(None);
        }
        let report = self.recovery.sweep()?;
        info!(
            recovered = report.recovered_count(),
            "Startup recovery sweep finished"
        );
        Ok(Some(report))
    }

    pub fn status_url(&self, job_id: &str) -> String {
        format!(
            "{}/jobs/{}",
            self.config.status_url_base.trim_end_matches('/'),
            job_id
        )
    }

    // ─── Submission ─────────────────────────────────────────────────────

    pub async fn submit_raw(&self, request: RawSubmission) -> Result<RawSubmitResponse, SubmitError> {
        let graph = self.resolve_graph(request.graph.as_deref())?;
        let size = request.content.len() as u64;
        if size == 0 || request.content.trim().is_empty() {
            return Err(SubmitError::EmptyPayload);
        }
        self.check_size(size)?;

        let format = detect_text(&request.content);
        let job_id = new_job_id();
        let job_dir = self.create_job_dir(&job_id).await?;
        let staged = job_dir.join(format!("payload.{}", format.extension()));
        tokio::fs::write(&staged, request.content.as_bytes())
            .await
            .map_err(|e| SubmitError::Staging {
                path: staged.clone(),
                source: e,
            })?;

        self.create_job(&job_id, &request.owner, 1, &graph, &job_dir, &[])
            .await?;
        self.start(&job_id, RunOptions::default());

        info!(job_id = %job_id, %format, size, "Raw payload submitted");
        Ok(RawSubmitResponse {
            status_url: self.status_url(&job_id),
            job_id,
            status: JobStatus::Pending,
            detected_format: format.name().to_string(),
            size,
        })
    }

    /// Stages a batch of files. Files with an unsupported extension or
    /// over the size limit are recorded as failed results right away; the
    /// rest are processed in the background.
    pub async fn submit_files(
        &self,
        request: FileBatchSubmission,
    ) -> Result<BatchSubmitResponse, SubmitError> {
        let graph = self.resolve_graph(request.graph.as_deref())?;
        if request.files.is_empty() {
            return Err(SubmitError::EmptyBatch);
        }

        let job_id = new_job_id();
        let job_dir = self.create_job_dir(&job_id).await?;
        let max = self.config.limits.max_payload_bytes;

        let mut pre_failed: Vec<FileResult> = Vec::new();
        let mut accepted = 0u32;
        for file in &request.files {
            let name = sanitize_file_name(&file.name);
            let ext = extension_of(&name);
            let size = match source_size(&file.source).await {
                Ok(size) => size,
                Err(e) => {
                    discard_job_dir(&job_dir).await;
                    return Err(SubmitError::Staging {
                        path: PathBuf::from(&name),
                        source: e,
                    });
                }
            };

            if !is_supported_extension(&ext) {
                let reason = if ext.is_empty() {
                    "File has no extension".to_string()
                } else {
                    format!("Unsupported file extension '.{}'", ext)
                };
                pre_failed.push(FileResult::pre_failed(&name, &ext, size, 415, &reason));
                continue;
            }
            if size > max {
                let reason = format!("File of {} bytes exceeds the maximum of {} bytes", size, max);
                pre_failed.push(FileResult::pre_failed(&name, &ext, size, 413, &reason));
                continue;
            }

            let dest = unique_destination(&job_dir, &name);
            if let Err(e) = stage(&file.source, &dest).await {
                discard_job_dir(&job_dir).await;
                return Err(e);
            }
            accepted += 1;
        }

        let total = request.files.len() as u32;
        self.create_job(&job_id, &request.owner, total, &graph, &job_dir, &pre_failed)
            .await?;

        let concurrency = self.config.limits.clamp_concurrency(request.concurrency);
        self.start(
            &job_id,
            RunOptions {
                concurrency: Some(concurrency),
                skip_provenance: request.skip_provenance,
            },
        );

        info!(
            job_id = %job_id,
            total,
            accepted,
            rejected = pre_failed.len(),
            "File batch submitted"
        );
        Ok(BatchSubmitResponse {
            status_url: self.status_url(&job_id),
            job_id,
            status: JobStatus::Pending,
            total_files: total,
            accepted_files: accepted,
            pre_failed_files: pre_failed
                .into_iter()
                .map(|r| PreFailedFile {
                    file_name: r.file_name,
                    http_status: r.http_status,
                    reason: r.response_body,
                })
                .collect(),
            concurrency,
        })
    }

    /// Waits for a job started by this service to finish its background
    /// run. Returns `false` if no such run is tracked.
    pub async fn wait_for(&self, job_id: &str) -> bool {
        let handle = self
            .running
            .lock()
            .ok()
            .and_then(|mut running| running.remove(job_id));
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(job_id = %job_id, error = %e, "Job task did not complete cleanly");
                }
                true
            }
            None => false,
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn list_jobs(&self, owner: &str, filter: &JobListFilter) -> Result<JobListResponse, StoreError> {
        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = filter.offset.unwrap_or(0);
        let page = JobListFilter {
            limit: Some(limit),
            offset: Some(offset),
            ..filter.clone()
        };
        let (jobs, total) = self.store.list_jobs(owner, &page)?;
        Ok(JobListResponse {
            jobs: jobs
                .iter()
                .map(|job| JobListItem::from_job(job, self.status_url(&job.job_id)))
                .collect(),
            total,
            limit,
            offset,
        })
    }

    pub fn job_detail(&self, owner: &str, job_id: &str) -> Result<JobDetail, StoreError> {
        let job = self
            .store
            .get_job_for_owner(job_id, owner)?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        let results = self.store.get_results(job_id)?;
        let history = self.store.get_logs(job_id)?;
        Ok(JobDetail::build(job, results, history, Utc::now()))
    }

    // ─── Recovery ───────────────────────────────────────────────────────

    pub fn check_recoverable(
        &self,
        owner: &str,
        job_id: &str,
        window: Option<RecoveryWindow>,
    ) -> Result<RecoverabilityCheck, RecoveryError> {
        self.recovery.check_recoverable(job_id, owner, window)
    }

    /// Recovers one job, or every stale job of `owner` when `job_id` is `None`.
    pub fn recover(
        &self,
        owner: &str,
        job_id: Option<&str>,
        window: Option<RecoveryWindow>,
    ) -> Result<RecoveryReport, RecoveryError> {
        let target = match job_id {
            Some(job_id) => RecoveryTarget::Job { job_id, owner },
            None => RecoveryTarget::Owner(owner),
        };
        self.recovery.recover(target, window)
    }

    pub fn sweep(&self) -> Result<RecoveryReport, RecoveryError> {
        self.recovery.sweep()
    }

    // ─── Named graphs ───────────────────────────────────────────────────

    pub fn register_graph(
        &self,
        iri: &str,
        description: Option<&str>,
    ) -> Result<RegisterGraphResponse, DatabaseError> {
        let newly_registered = self.registry.register(iri, description)?;
        Ok(RegisterGraphResponse {
            iri: normalize_iri(iri).to_string(),
            newly_registered,
        })
    }

    pub fn list_graphs(&self) -> Result<Vec<NamedGraph>, DatabaseError> {
        self.registry.list()
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn resolve_graph(&self, requested: Option<&str>) -> Result<String, SubmitError> {
        let graph = normalize_iri(requested.unwrap_or(&self.config.default_graph)).to_string();
        let exists = self
            .registry
            .exists(&graph)
            .map_err(|e| SubmitError::Store(StoreError::Database(e)))?;
        if !exists {
            return Err(SubmitError::UnregisteredGraph(graph));
        }
        Ok(graph)
    }

    fn check_size(&self, size: u64) -> Result<(), SubmitError> {
        let max = self.config.limits.max_payload_bytes;
        if size > max {
            return Err(SubmitError::PayloadTooLarge { size, max });
        }
        Ok(())
    }

    async fn create_job_dir(&self, job_id: &str) -> Result<PathBuf, SubmitError> {
        let job_dir = self.config.jobs_directory.join(job_id);
        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(|e| SubmitError::Staging {
                path: job_dir.clone(),
                source: e,
            })?;
        Ok(job_dir)
    }

    /// Creates the pending job and records the pre-failed files in one
    /// store transaction. Removes the staged directory if that fails.
    async fn create_job(
        &self,
        job_id: &str,
        owner: &str,
        total_files: u32,
        graph: &str,
        job_dir: &Path,
        pre_failed: &[FileResult],
    ) -> Result<(), SubmitError> {
        let new_job = NewJob {
            job_id: job_id.to_string(),
            owner: owner.to_string(),
            total_files,
            endpoint: self.config.graph_store.endpoint.clone(),
            graph: graph.to_string(),
            job_dir: job_dir.to_path_buf(),
            start_time: Utc::now(),
        };
        if let Err(e) = self.store.create_job_with_results(&new_job, pre_failed) {
            discard_job_dir(job_dir).await;
            return Err(e.into());
        }

        let queued = if pre_failed.is_empty() {
            format!("Job queued with {} files", total_files)
        } else {
            format!(
                "Job queued with {} files ({} rejected at submission)",
                total_files,
                pre_failed.len()
            )
        };
        let mut entries = vec![ProcessingLogEntry::job_level(ProcessingStage::Queued, queued)];
        for (i, result) in pre_failed.iter().enumerate() {
            entries.push(ProcessingLogEntry::for_file(
                &result.file_name,
                ProcessingStage::Failed,
                format!("Rejected (HTTP {}): {}", result.http_status, result.response_body),
                i as u32 + 1,
                total_files,
            ));
        }
        for entry in &entries {
            if let Err(e) = self.store.append_log(job_id, entry) {
                warn!(job_id = %job_id, error = %e, "Failed to append processing log");
            }
        }
        Ok(())
    }

    fn start(&self, job_id: &str, options: RunOptions) {
        let handle = self.orchestrator.spawn(job_id, options);
        if let Ok(mut running) = self.running.lock() {
            running.retain(|_, h| !h.is_finished());
            running.insert(job_id.to_string(), handle);
        }
    }
}

fn resolve_credentials(config: &IngestConfig) -> Result<Option<Credentials>, IngestError> {
    let Some(username) = config.graph_store.username.clone() else {
        return Ok(None);
    };
    let password = config
        .graph_store
        .password
        .resolve_optional()?
        .unwrap_or_else(|| SecretString::from(String::new()));
    Ok(Some(Credentials { username, password }))
}

fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// Final path component of a client-supplied name, never a dot-entry.
fn sanitize_file_name(name: &str) -> String {
    let base = redact_path(Path::new(name.trim()));
    let base = base.trim_start_matches('.');
    if base.is_empty() || base == "<unknown>" {
        "unnamed".to_string()
    } else {
        base.to_string()
    }
}

/// `name`, or `stem-N.ext` when a file of that name is already staged.
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string();
    let ext = path.extension().and_then(|e| e.to_str());
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{}-{}.{}", stem, n, ext)),
            None => dir.join(format!("{}-{}", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

async fn discard_job_dir(job_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(job_dir).await {
        warn!(dir = %job_dir.display(), error = %e, "Failed to remove staged files");
    }
}

async fn source_size(source: &FileSource) -> std::io::Result<u64> {
    match source {
        FileSource::Bytes(bytes) => Ok(bytes.len() as u64),
        FileSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
    }
}

async fn stage(source: &FileSource, dest: &Path) -> Result<(), SubmitError> {
    let staging = |e| SubmitError::Staging {
        path: dest.to_path_buf(),
        source: e,
    };
    match source {
        FileSource::Bytes(bytes) => tokio::fs::write(dest, bytes).await.map_err(staging),
        FileSource::Path(path) => tokio::fs::copy(path, dest).await.map(|_| ()).map_err(staging),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd.ttl"), "passwd.ttl");
        assert_eq!(sanitize_file_name("dir/a.ttl"), "a.ttl");
        assert_eq!(sanitize_file_name(".hidden.nt"), "hidden.nt");
        assert_eq!(sanitize_file_name(""), "unnamed");
    }

    #[test]
    fn test_unique_destination() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.ttl"), dir.path().join("a.ttl"));
        std::fs::write(dir.path().join("a.ttl"), "x").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.ttl"), dir.path().join("a-1.ttl"));
        std::fs::write(dir.path().join("a-1.ttl"), "x").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.ttl"), dir.path().join("a-2.ttl"));
    }
}
