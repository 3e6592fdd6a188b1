use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read staged file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provenance attachment failed: {0}")]
    Provenance(#[from] crate::error::ProvenanceError),

    #[error("Chunked upload failed: {0}")]
    Chunk(#[from] crate::error::ChunkError),

    #[error("Background task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    ProvenanceSkipped,
    ProvenancePassedThrough(String),
    IntermediateNotRemoved { path: String, error: String },
}
