//! Real-time event streaming for job progress.
//!
//! Subscribers may follow jobs live; a slow or missing subscriber never
//! affects ingestion.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
