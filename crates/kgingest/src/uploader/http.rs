//! Graph store protocol uploader over reqwest.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Url};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use super::{is_success_status, Credentials, GraphTarget, Payload, UploadOutcome, Uploader};
use crate::job::truncate_body;
use crate::sanitize::redact_endpoint;

/// Default connection timeout for the graph store.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default whole-request timeout; large loads can legitimately take a while.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// POSTs payloads to `<endpoint>?graph=<iri>`.
#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    stream_threshold: u64,
    body_limit: usize,
}

impl HttpUploader {
    pub fn new(
        connect_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
        stream_threshold: u64,
        body_limit: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .timeout(request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .build()?;
        Ok(Self::with_client(client, stream_threshold, body_limit))
    }

    pub fn with_client(client: Client, stream_threshold: u64, body_limit: usize) -> Self {
        Self {
            client,
            stream_threshold,
            body_limit,
        }
    }

    /// Builds the request URL with the graph IRI as a query parameter.
    pub fn target_url(target: &GraphTarget) -> Result<Url, String> {
        Url::parse_with_params(&target.endpoint, &[("graph", target.graph.as_str())])
            .map_err(|e| format!("Invalid endpoint URL: {}", e))
    }

    async fn body_for(&self, payload: Payload) -> Result<Body, String> {
        match payload {
            Payload::Bytes(bytes) => Ok(Body::from(bytes)),
            Payload::File { path, size } if size > self.stream_threshold => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| format!("Failed to open payload: {}", e))?;
                Ok(Body::from(file))
            }
            Payload::File { path, .. } => tokio::fs::read(&path)
                .await
                .map(Body::from)
                .map_err(|e| format!("Failed to read payload: {}", e)),
        }
    }

    async fn send(
        &self,
        payload: Payload,
        content_type: &str,
        target: &GraphTarget,
        auth: Option<&Credentials>,
    ) -> Result<(u16, String), String> {
        let url = Self::target_url(target)?;
        let size = payload.len();
        let body = self.body_for(payload).await?;

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .body(body);
        if let Some(creds) = auth {
            request = request.basic_auth(&creds.username, Some(creds.password.expose_secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        payload: Payload,
        content_type: &str,
        target: &GraphTarget,
        auth: Option<&Credentials>,
    ) -> UploadOutcome {
        let bytes = payload.len();
        let started = Instant::now();
        let result = self.send(payload, content_type, target, auth).await;
        let elapsed = started.elapsed();

        match result {
            Ok((status, body)) => {
                let success = is_success_status(status);
                if success {
                    debug!(
                        endpoint = %redact_endpoint(&target.endpoint),
                        status,
                        bytes,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Upload accepted"
                    );
                } else {
                    warn!(
                        endpoint = %redact_endpoint(&target.endpoint),
                        status,
                        "Upload rejected by graph store"
                    );
                }
                UploadOutcome {
                    http_status: status,
                    elapsed,
                    success,
                    bytes,
                    response_body: truncate_body(&body, self.body_limit),
                }
            }
            Err(message) => {
                warn!(
                    endpoint = %redact_endpoint(&target.endpoint),
                    error = %message,
                    "Upload failed before a response was received"
                );
                UploadOutcome {
                    http_status: 0,
                    elapsed,
                    success: false,
                    bytes,
                    response_body: truncate_body(&message, self.body_limit),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use secrecy::SecretString;

    #[derive(Debug, Clone)]
    struct Received {
        graph: String,
        content_type: String,
        authorization: Option<String>,
        body: Vec<u8>,
    }

    type Log = Arc<Mutex<Vec<Received>>>;

    async fn store_handler(
        State(log): State<Log>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, String) {
        let graph = params.get("graph").cloned().unwrap_or_default();
        log.lock().unwrap().push(Received {
            graph: graph.clone(),
            content_type: headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: body.to_vec(),
        });
        if graph == "urn:fail" {
            (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(5000))
        } else {
            (StatusCode::CREATED, String::new())
        }
    }

    async fn spawn_store() -> (String, Log) {
        let log: Log = Arc::default();
        let app = Router::new()
            .route("/store", post(store_handler))
            .with_state(log.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/store", addr), log)
    }

    fn uploader(stream_threshold: u64) -> HttpUploader {
        HttpUploader::new(
            Some(Duration::from_secs(2)),
            Some(Duration::from_secs(10)),
            stream_threshold,
            2000,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_bytes_success_with_auth() {
        let (endpoint, log) = spawn_store().await;
        let target = GraphTarget {
            endpoint,
            graph: "https://example.org/g".to_string(),
        };
        let creds = Credentials {
            username: "admin".to_string(),
            password: SecretString::from("pw"),
        };

        let outcome = uploader(1024)
            .upload(
                Payload::Bytes(b"<a> <b> <c> .".to_vec()),
                "application/n-triples",
                &target,
                Some(&creds),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.http_status, 201);
        assert_eq!(outcome.bytes, 13);

        let received = log.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].graph, "https://example.org/g");
        assert_eq!(received[0].content_type, "application/n-triples");
        assert!(received[0].authorization.as_deref().unwrap().starts_with("Basic "));
    }

    #[tokio::test]
    async fn test_streamed_file_upload_sends_whole_file() {
        let (endpoint, log) = spawn_store().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.nt");
        let content = "<https://e.org/s> <https://e.org/p> \"o\" .\n".repeat(200);
        std::fs::write(&path, &content).unwrap();

        let outcome = uploader(16)
            .upload(
                Payload::File {
                    path,
                    size: content.len() as u64,
                },
                "application/n-triples",
                &GraphTarget {
                    endpoint,
                    graph: "urn:g".to_string(),
                },
                None,
            )
            .await;

        assert!(outcome.success);
        let received = log.lock().unwrap();
        assert_eq!(received[0].body.len(), content.len());
        assert!(received[0].authorization.is_none());
    }

    #[tokio::test]
    async fn test_rejection_truncates_body() {
        let (endpoint, _log) = spawn_store().await;
        let outcome = uploader(1024)
            .upload(
                Payload::Bytes(b"x".to_vec()),
                "text/turtle",
                &GraphTarget {
                    endpoint,
                    graph: "urn:fail".to_string(),
                },
                None,
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.http_status, 500);
        assert_eq!(outcome.response_body.len(), 2000);
    }

    #[tokio::test]
    async fn test_network_error_is_status_zero() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = uploader(1024)
            .upload(
                Payload::Bytes(b"x".to_vec()),
                "text/turtle",
                &GraphTarget {
                    endpoint: format!("http://{}/store", addr),
                    graph: "urn:g".to_string(),
                },
                None,
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.http_status, 0);
        assert!(!outcome.response_body.is_empty());
    }

    #[test]
    fn test_target_url_encodes_graph() {
        let url = HttpUploader::target_url(&GraphTarget {
            endpoint: "http://store.example/ds".to_string(),
            graph: "https://example.org/g?x=1".to_string(),
        })
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://store.example/ds?graph=https%3A%2F%2Fexample.org%2Fg%3Fx%3D1"
        );
        assert!(HttpUploader::target_url(&GraphTarget {
            endpoint: "not a url".to_string(),
            graph: "urn:g".to_string(),
        })
        .is_err());
    }
}
