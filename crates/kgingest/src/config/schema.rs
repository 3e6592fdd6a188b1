use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunker::ChunkPlan;
use crate::provenance::ProvenanceOptions;
use crate::secrets::SecretSource;

/// 1.5 GiB.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1_610_612_736;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub version: String,
    /// SQLite file; defaults to `~/.kgingest/data/kgingest.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_jobs_directory")]
    pub jobs_directory: PathBuf,
    pub default_graph: String,
    /// Prefix for the `status_url` returned on submission.
    #[serde(default)]
    pub status_url_base: String,
    #[serde(default = "default_provenance_namespace")]
    pub provenance_namespace: String,
    pub graph_store: GraphStoreConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_jobs_directory() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".kgingest").join("jobs"))
        .unwrap_or_else(|| PathBuf::from("kgingest-jobs"))
}

fn default_provenance_namespace() -> String {
    "https://kgingest.local/".to_string()
}

impl IngestConfig {
    /// A valid configuration pointing at `endpoint` with every other value defaulted.
    pub fn with_endpoint(endpoint: &str, default_graph: &str) -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            jobs_directory: default_jobs_directory(),
            default_graph: default_graph.to_string(),
            status_url_base: String::new(),
            provenance_namespace: default_provenance_namespace(),
            graph_store: GraphStoreConfig {
                endpoint: endpoint.to_string(),
                username: None,
                password: SecretSource::default(),
                connect_timeout_secs: default_connect_timeout(),
                request_timeout_secs: default_request_timeout(),
            },
            limits: LimitsConfig::default(),
            chunking: ChunkingConfig::default(),
            recovery: RecoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn provenance_options(&self) -> ProvenanceOptions {
        ProvenanceOptions {
            default_namespace: self.provenance_namespace.clone(),
            streaming_threshold: self.limits.provenance_streaming_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStoreConfig {
    /// Graph store protocol endpoint; the target graph is passed as `?graph=`.
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: SecretSource,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    1800
}

impl GraphStoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: u64,
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub result_batch_size: usize,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    /// Above this size provenance is appended without parsing.
    #[serde(default = "default_provenance_streaming_threshold")]
    pub provenance_streaming_threshold: u64,
    /// Above this size upload bodies are streamed from disk.
    #[serde(default = "default_upload_streaming_threshold")]
    pub upload_streaming_threshold: u64,
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,
}

fn default_max_payload() -> u64 {
    DEFAULT_MAX_PAYLOAD_BYTES
}

fn default_concurrency() -> usize {
    num_cpus::get().clamp(2, 8)
}

fn default_max_concurrency() -> usize {
    16
}

fn default_batch_size() -> usize {
    10
}

fn default_job_timeout() -> u64 {
    2 * 60 * 60
}

fn default_provenance_streaming_threshold() -> u64 {
    50 * 1024 * 1024
}

fn default_upload_streaming_threshold() -> u64 {
    10 * 1024 * 1024
}

fn default_response_body_limit() -> usize {
    2000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload(),
            default_concurrency: default_concurrency(),
            max_concurrency: default_max_concurrency(),
            result_batch_size: default_batch_size(),
            job_timeout_secs: default_job_timeout(),
            provenance_streaming_threshold: default_provenance_streaming_threshold(),
            upload_streaming_threshold: default_upload_streaming_threshold(),
            response_body_limit: default_response_body_limit(),
        }
    }
}

impl LimitsConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Clamps a requested concurrency into `1..=max_concurrency`.
    pub fn clamp_concurrency(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_concurrency)
            .clamp(1, self.max_concurrency.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files larger than this are uploaded in fragments.
    #[serde(default = "default_chunk_threshold")]
    pub threshold_bytes: u64,
    #[serde(default = "default_max_triples")]
    pub max_triples: usize,
    #[serde(default = "default_very_large_max_triples")]
    pub very_large_max_triples: usize,
    #[serde(default = "default_very_large_threshold")]
    pub very_large_threshold_bytes: u64,
    /// Fragments buffered between the parser and the uploader.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_chunk_threshold() -> u64 {
    100 * 1024 * 1024
}

fn default_max_triples() -> usize {
    50_000
}

fn default_very_large_max_triples() -> usize {
    10_000
}

fn default_very_large_threshold() -> u64 {
    1024 * 1024 * 1024
}

fn default_channel_capacity() -> usize {
    2
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: default_chunk_threshold(),
            max_triples: default_max_triples(),
            very_large_max_triples: default_very_large_max_triples(),
            very_large_threshold_bytes: default_very_large_threshold(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl ChunkingConfig {
    pub fn plan(&self) -> ChunkPlan {
        ChunkPlan {
            max_quads: self.max_triples,
            very_large_max_quads: self.very_large_max_triples,
            very_large_threshold: self.very_large_threshold_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Running jobs younger than this are never reclaimed.
    #[serde(default = "default_min_age")]
    pub min_age_secs: u64,
    /// Running jobs older than this are out of scope for recovery.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
    #[serde(default)]
    pub on_startup: bool,
}

fn default_min_age() -> u64 {
    3 * 60 * 60
}

fn default_max_age() -> u64 {
    30 * 24 * 60 * 60
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_age_secs: default_min_age(),
            max_age_secs: default_max_age(),
            on_startup: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}
