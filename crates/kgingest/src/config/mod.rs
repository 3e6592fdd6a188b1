pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config};
pub use schema::{
    ChunkingConfig, GraphStoreConfig, IngestConfig, LimitsConfig, LoggingConfig, RecoveryConfig,
    DEFAULT_MAX_PAYLOAD_BYTES,
};
