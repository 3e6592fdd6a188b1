use std::path::PathBuf;

use crate::config::{ChunkingConfig, IngestConfig};
use crate::provenance::ProvenanceOptions;
use crate::uploader::{Credentials, GraphTarget};

/// Everything the per-file pipeline needs for one job.
pub struct PipelineConfig {
    /// User recorded as the provenance agent.
    pub owner: String,
    pub target: GraphTarget,
    pub credentials: Option<Credentials>,
    pub skip_provenance: bool,
    pub provenance: ProvenanceOptions,
    pub chunking: ChunkingConfig,
    /// Scratch directory for provenance-augmented copies.
    pub work_dir: PathBuf,
}

impl PipelineConfig {
    pub fn from_config(
        config: &IngestConfig,
        owner: &str,
        target: GraphTarget,
        credentials: Option<Credentials>,
        skip_provenance: bool,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            target,
            credentials,
            skip_provenance,
            provenance: config.provenance_options(),
            chunking: config.chunking.clone(),
            work_dir,
        }
    }
}
