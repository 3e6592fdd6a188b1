//! Transfer of processed payloads into a named graph on the remote store.
//!
//! Upload failures are outcomes, not errors: an [`UploadOutcome`] with
//! `success == false` (and status 0 when no response arrived) is returned
//! so sibling files keep going.

mod http;

pub use http::HttpUploader;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

/// HTTP statuses treated as a successful load.
pub const SUCCESS_STATUSES: &[u16] = &[200, 201, 204];

pub fn is_success_status(status: u16) -> bool {
    SUCCESS_STATUSES.contains(&status)
}

/// What to send.
#[derive(Debug, Clone)]
pub enum Payload {
    Bytes(Vec<u8>),
    /// Read from disk; streamed when larger than the uploader's threshold.
    File { path: PathBuf, size: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Bytes(b) => b.len() as u64,
            Payload::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where to send it: a graph-store endpoint and the named graph IRI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphTarget {
    pub endpoint: String,
    pub graph: String,
}

/// Basic-auth credentials for the graph store.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    /// 0 when no HTTP response was received.
    pub http_status: u16,
    pub elapsed: Duration,
    pub success: bool,
    pub bytes: u64,
    /// Response body (or transport error), truncated.
    pub response_body: String,
}

impl UploadOutcome {
    /// Bytes per second over the measured wall-clock time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        payload: Payload,
        content_type: &str,
        target: &GraphTarget,
        auth: Option<&Credentials>,
    ) -> UploadOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        assert!(is_success_status(200));
        assert!(is_success_status(201));
        assert!(is_success_status(204));
        assert!(!is_success_status(202));
        assert!(!is_success_status(0));
    }

    #[test]
    fn test_throughput() {
        let outcome = UploadOutcome {
            http_status: 201,
            elapsed: Duration::from_millis(500),
            success: true,
            bytes: 1000,
            response_body: String::new(),
        };
        assert_eq!(outcome.throughput(), 2000.0);

        let instant = UploadOutcome {
            elapsed: Duration::ZERO,
            ..outcome
        };
        assert_eq!(instant.throughput(), 0.0);
    }
}
