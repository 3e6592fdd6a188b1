pub mod orchestrator;

pub use orchestrator::{list_staged_files, Orchestrator, RunOptions, WORK_DIR_NAME};
