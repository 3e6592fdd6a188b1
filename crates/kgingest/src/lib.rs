pub mod broadcast;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod job;
pub mod pipeline;
pub mod provenance;
pub mod recovery;
pub mod registry;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod store;
pub mod uploader;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, load_config_from_str, IngestConfig};
pub use error::{
    ConfigError, IngestError, OrchestratorError, RecoveryError, Result, StoreError, SubmitError,
};
pub use job::{EffectiveStatus, FileResult, Job, JobStatus, ProcessingLogEntry, ProcessingStage};
pub use recovery::{RecoverabilityCheck, RecoveryManager, RecoveryReport, RecoveryWindow};
pub use registry::{GraphRegistry, NamedGraph, SqliteGraphRegistry};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use service::{FileBatchSubmission, IncomingFile, IngestService, RawSubmission};
pub use store::{JobListFilter, JobStore, SqliteJobStore};
pub use uploader::{Credentials, GraphTarget, HttpUploader, Uploader};
pub use worker::{Orchestrator, RunOptions};
