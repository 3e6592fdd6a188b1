use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Submission rejected: {0}")]
    Submit(#[from] SubmitError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Orchestration error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Provenance error: {0}")]
    Provenance(#[from] ProvenanceError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ProvenanceError {
    #[error("User must be a non-empty string")]
    EmptyUser,

    #[error("Document is empty")]
    EmptyDocument,

    #[error("Failed to parse {format} document: {message}")]
    Parse { format: String, message: String },

    #[error("Failed to serialize provenance-augmented document: {0}")]
    Serialize(String),

    #[error("Invalid IRI '{iri}': {message}")]
    InvalidIri { iri: String, message: String },

    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Failed to parse {format} document: {message}")]
    Parse { format: String, message: String },

    #[error("Format {0} cannot be split into chunks")]
    Unsupported(String),

    #[error("Failed to serialize chunk: {0}")]
    Serialize(String),

    #[error("Invalid graph IRI '{0}'")]
    InvalidGraph(String),

    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Named graph is not registered: {0}")]
    UnregisteredGraph(String),

    #[error("Payload of {size} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Payload is empty")]
    EmptyPayload,

    #[error("No files were submitted")]
    EmptyBatch,

    #[error("Failed to stage '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// HTTP status a request layer should answer with for this rejection.
    pub fn http_status(&self) -> u16 {
        match self {
            SubmitError::UnregisteredGraph(_)
            | SubmitError::EmptyPayload
            | SubmitError::EmptyBatch => 400,
            SubmitError::PayloadTooLarge { .. } => 413,
            SubmitError::JobNotFound(_) => 404,
            SubmitError::Staging { .. } | SubmitError::Store(_) => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} is {status}, not pending")]
    NotPending { job_id: String, status: String },

    #[error("Job timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Failed to read job directory '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
