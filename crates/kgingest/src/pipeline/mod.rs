pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::FileContext;
pub use error::{PipelineError, PipelineWarning};
pub use progress::{JournalProgress, NoopProgress, ProgressReporter, RecordingProgress};
pub use runner::{FileOutcome, Pipeline};
