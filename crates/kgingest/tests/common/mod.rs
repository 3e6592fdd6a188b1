//! Shared harness for driving the public service API end to end.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use kgingest::db::Database;
use kgingest::sanitize::redact_path;
use kgingest::uploader::{Payload, UploadOutcome};
use kgingest::{
    Credentials, GraphRegistry, GraphTarget, IngestConfig, IngestService, JobStore,
    SqliteGraphRegistry, SqliteJobStore, Uploader,
};

pub const ENDPOINT: &str = "http://store.invalid/ds";
pub const DEFAULT_GRAPH: &str = "https://example.org/graph/default";
pub const OWNER: &str = "alice";

pub const TURTLE: &str = "@prefix ex: <https://example.org/data/> .\n\
ex:alice ex:knows ex:bob .\n\
ex:bob ex:name \"Bob\" .\n";

pub const NTRIPLES: &str =
    "<https://example.org/data/a> <https://example.org/data/p> \"x\" .\n";

/// In-process graph store. Files whose name contains one of `failing`
/// are answered with a 500.
pub struct FakeUploader {
    failing: Vec<String>,
    delay: Duration,
    calls: AtomicUsize,
    graphs: Mutex<Vec<String>>,
}

impl FakeUploader {
    pub fn new() -> Arc<Self> {
        Self::with(&[], Duration::ZERO)
    }

    pub fn with(failing: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            delay,
            calls: AtomicUsize::new(0),
            graphs: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_everything() -> Arc<Self> {
        Self::with(&[""], Duration::ZERO)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Graph IRIs of every upload, in call order.
    pub fn graphs(&self) -> Vec<String> {
        self.graphs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        payload: Payload,
        _content_type: &str,
        target: &GraphTarget,
        _auth: Option<&Credentials>,
    ) -> UploadOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.graphs.lock().unwrap().push(target.graph.clone());
        tokio::time::sleep(self.delay).await;

        let name = match &payload {
            Payload::File { path, .. } => redact_path(path),
            Payload::Bytes(_) => String::new(),
        };
        let fail = self.failing.iter().any(|f| name.contains(f.as_str()));
        UploadOutcome {
            http_status: if fail { 500 } else { 201 },
            elapsed: self.delay,
            success: !fail,
            bytes: payload.len(),
            response_body: if fail {
                "graph store unavailable".to_string()
            } else {
                String::new()
            },
        }
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub service: IngestService,
    pub store: Arc<dyn JobStore>,
    pub uploader: Arc<FakeUploader>,
}

impl TestEnv {
    pub fn new(uploader: Arc<FakeUploader>) -> Self {
        Self::with_config(uploader, |_| {})
    }

    pub fn with_config(uploader: Arc<FakeUploader>, tweak: impl FnOnce(&mut IngestConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = IngestConfig::with_endpoint(ENDPOINT, DEFAULT_GRAPH);
        config.jobs_directory = dir.path().join("jobs");
        tweak(&mut config);

        let db = Database::open_in_memory().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db.clone()));
        let registry = Arc::new(SqliteGraphRegistry::new(db));
        registry.register(DEFAULT_GRAPH, Some("default")).unwrap();

        let service =
            IngestService::new(config, Arc::clone(&store), registry, uploader.clone()).unwrap();

        Self {
            dir,
            service,
            store,
            uploader,
        }
    }

    /// Writes a source file outside the jobs directory.
    pub fn source_file(&self, name: &str, content: &str) -> std::path::PathBuf {
        let src = self.dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let path = src.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}
