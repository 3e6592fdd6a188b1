//! Submission through orchestration to the job detail view.

mod common;

use std::time::Duration;

use kgingest::format::RdfFormat;
use kgingest::recovery::RECOVERY_RESULT_NAME;
use kgingest::service::{FileBatchSubmission, IncomingFile, RawSubmission};
use kgingest::{EffectiveStatus, JobListFilter, JobStatus, StoreError, SubmitError};

use common::{FakeUploader, TestEnv, DEFAULT_GRAPH, NTRIPLES, OWNER, TURTLE};

fn batch(files: Vec<IncomingFile>) -> FileBatchSubmission {
    FileBatchSubmission {
        owner: OWNER.to_string(),
        files,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_raw_submission_completes() {
    let env = TestEnv::new(FakeUploader::new());

    let response = env
        .service
        .submit_raw(RawSubmission {
            owner: OWNER.to_string(),
            graph: None,
            content: TURTLE.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.status, JobStatus::Pending);
    assert_eq!(response.detected_format, RdfFormat::Turtle.name());
    assert_eq!(response.size, TURTLE.len() as u64);
    assert!(response.status_url.ends_with(&format!("/jobs/{}", response.job_id)));

    assert!(env.service.wait_for(&response.job_id).await);

    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.status, JobStatus::Done);
    assert_eq!(detail.effective_status, EffectiveStatus::Done);
    assert_eq!(detail.total_files, 1);
    assert_eq!(detail.success_count, 1);
    assert_eq!(detail.progress_percent, 100.0);
    assert!(detail.end_time.is_some());
    assert_eq!(env.uploader.graphs(), vec![DEFAULT_GRAPH.to_string()]);

    let stages: Vec<String> = detail.history.iter().map(|e| e.stage.to_string()).collect();
    assert_eq!(stages.first().map(String::as_str), Some("queued"));
    assert!(stages.iter().any(|s| s == "provenance"));
}

#[tokio::test]
async fn test_mixed_batch_is_partial() {
    let env = TestEnv::new(FakeUploader::new());
    let files = vec![
        IncomingFile::from_bytes("a.ttl", TURTLE),
        IncomingFile::from_bytes("b.nt", NTRIPLES),
        IncomingFile::from_bytes("c.xyz", "not rdf"),
    ];

    let response = env.service.submit_files(batch(files)).await.unwrap();
    assert_eq!(response.total_files, 3);
    assert_eq!(response.accepted_files, 2);
    assert_eq!(response.pre_failed_files.len(), 1);
    assert_eq!(response.pre_failed_files[0].file_name, "c.xyz");
    assert_eq!(response.pre_failed_files[0].http_status, 415);

    env.service.wait_for(&response.job_id).await;

    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.status, JobStatus::Done);
    assert_eq!(detail.effective_status, EffectiveStatus::Partial);
    assert_eq!(detail.processed_files, 3);
    assert_eq!(detail.success_count, 2);
    assert_eq!(detail.fail_count, 1);
    assert_eq!(detail.failed_files.len(), 1);
    assert_eq!(detail.failed_files[0].file_name, "c.xyz");
    assert_eq!(detail.failed_files[0].http_status, 415);
    assert_eq!(env.uploader.calls(), 2);
}

#[tokio::test]
async fn test_all_uploads_rejected_is_failed() {
    let env = TestEnv::new(FakeUploader::failing_everything());
    let files = vec![
        IncomingFile::from_bytes("a.ttl", TURTLE),
        IncomingFile::from_bytes("b.nt", NTRIPLES),
    ];

    let response = env.service.submit_files(batch(files)).await.unwrap();
    env.service.wait_for(&response.job_id).await;

    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.status, JobStatus::Done);
    assert_eq!(detail.effective_status, EffectiveStatus::Failed);
    assert_eq!(detail.fail_count, 2);
    assert!(detail
        .failed_files
        .iter()
        .all(|f| f.http_status == 500 && f.message.contains("unavailable")));
}

#[tokio::test]
async fn test_batch_of_only_rejected_files_never_uploads() {
    let env = TestEnv::new(FakeUploader::new());
    let files = vec![IncomingFile::from_bytes("notes.txt", "hello")];

    let response = env.service.submit_files(batch(files)).await.unwrap();
    assert_eq!(response.accepted_files, 0);
    env.service.wait_for(&response.job_id).await;

    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.status, JobStatus::Done);
    assert_eq!(detail.effective_status, EffectiveStatus::Failed);
    assert_eq!(detail.status_message.as_deref(), Some("No files to process"));
    assert_eq!(env.uploader.calls(), 0);
}

#[tokio::test]
async fn test_oversized_file_is_rejected_with_413() {
    let env = TestEnv::with_config(FakeUploader::new(), |c| c.limits.max_payload_bytes = 200);
    let big = format!("{}{}", TURTLE, "# padding\n".repeat(30));
    let files = vec![
        IncomingFile::from_bytes("big.ttl", big),
        IncomingFile::from_bytes("small.nt", NTRIPLES),
    ];

    let response = env.service.submit_files(batch(files)).await.unwrap();
    assert_eq!(response.pre_failed_files.len(), 1);
    assert_eq!(response.pre_failed_files[0].http_status, 413);

    env.service.wait_for(&response.job_id).await;
    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.effective_status, EffectiveStatus::Partial);
}

#[tokio::test]
async fn test_files_submitted_from_disk() {
    let env = TestEnv::new(FakeUploader::new());
    let a = env.source_file("a.ttl", TURTLE);
    let b = env.source_file("b.nt", NTRIPLES);

    let mut request = batch(vec![IncomingFile::from_path(a), IncomingFile::from_path(b)]);
    request.concurrency = Some(100);
    request.skip_provenance = true;

    let response = env.service.submit_files(request).await.unwrap();
    assert_eq!(response.concurrency, env.service.config().limits.max_concurrency);

    env.service.wait_for(&response.job_id).await;
    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.effective_status, EffectiveStatus::Done);
    assert!(!detail.history.iter().any(|e| e.stage.to_string() == "provenance"));
}

#[tokio::test]
async fn test_job_deadline_finalizes_as_error() {
    let env = TestEnv::with_config(FakeUploader::with(&[], Duration::from_secs(10)), |c| {
        c.limits.job_timeout_secs = 1
    });
    let files = vec![IncomingFile::from_bytes("slow.nt", NTRIPLES)];

    let started = std::time::Instant::now();
    let response = env.service.submit_files(batch(files)).await.unwrap();
    env.service.wait_for(&response.job_id).await;
    assert!(started.elapsed() < Duration::from_secs(8));

    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.status, JobStatus::Error);
    assert_eq!(detail.effective_status, EffectiveStatus::Error);
    assert!(detail.status_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_validation_rejections() {
    let env = TestEnv::new(FakeUploader::new());

    let err = env
        .service
        .submit_raw(RawSubmission {
            owner: OWNER.to_string(),
            graph: Some("https://example.org/graph/unknown".to_string()),
            content: TURTLE.to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::UnregisteredGraph(_)));
    assert_eq!(err.http_status(), 400);

    let err = env
        .service
        .submit_raw(RawSubmission {
            owner: OWNER.to_string(),
            graph: None,
            content: "   \n".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::EmptyPayload));

    let err = env.service.submit_files(batch(vec![])).await.unwrap_err();
    assert!(matches!(err, SubmitError::EmptyBatch));

    let listed = env
        .service
        .list_jobs(OWNER, &JobListFilter::default())
        .unwrap();
    assert_eq!(listed.total, 0);
    assert_eq!(env.uploader.calls(), 0);
}

#[tokio::test]
async fn test_registered_graph_is_accepted() {
    let env = TestEnv::new(FakeUploader::new());
    let graph = "https://example.org/graph/people";

    let registered = env.service.register_graph(graph, None).unwrap();
    assert!(registered.newly_registered);
    assert!(!env.service.register_graph(graph, None).unwrap().newly_registered);

    let response = env
        .service
        .submit_raw(RawSubmission {
            owner: OWNER.to_string(),
            graph: Some(format!(" {} ", graph)),
            content: NTRIPLES.to_string(),
        })
        .await
        .unwrap();
    env.service.wait_for(&response.job_id).await;

    assert_eq!(env.uploader.graphs(), vec![graph.to_string()]);
    assert_eq!(env.service.list_graphs().unwrap().len(), 2);
}

#[tokio::test]
async fn test_jobs_are_scoped_to_owner() {
    let env = TestEnv::new(FakeUploader::new());
    let response = env
        .service
        .submit_raw(RawSubmission {
            owner: OWNER.to_string(),
            graph: None,
            content: NTRIPLES.to_string(),
        })
        .await
        .unwrap();
    env.service.wait_for(&response.job_id).await;

    let err = env.service.job_detail("mallory", &response.job_id).unwrap_err();
    assert!(matches!(err, StoreError::JobNotFound(_)));
    assert_eq!(
        env.service
            .list_jobs("mallory", &JobListFilter::default())
            .unwrap()
            .total,
        0
    );

    let listed = env.service.list_jobs(OWNER, &JobListFilter::default()).unwrap();
    assert_eq!(listed.total, 1);
    assert_eq!(listed.jobs[0].job_id, response.job_id);
    assert_eq!(listed.jobs[0].effective_status, EffectiveStatus::Done);
}

#[tokio::test]
async fn test_progress_events_reach_subscribers() {
    let env = TestEnv::new(FakeUploader::new());
    let mut events = env.service.subscribe();

    let response = env
        .service
        .submit_raw(RawSubmission {
            owner: OWNER.to_string(),
            graph: None,
            content: TURTLE.to_string(),
        })
        .await
        .unwrap();
    env.service.wait_for(&response.job_id).await;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(received.iter().all(|e| e.job_id == response.job_id));
    assert!(received.iter().any(|e| e.is_terminal()));
}

#[tokio::test]
async fn test_finished_job_is_never_recovered() {
    let env = TestEnv::new(FakeUploader::new());
    let response = env
        .service
        .submit_raw(RawSubmission {
            owner: OWNER.to_string(),
            graph: None,
            content: NTRIPLES.to_string(),
        })
        .await
        .unwrap();
    env.service.wait_for(&response.job_id).await;

    let check = env
        .service
        .check_recoverable(OWNER, &response.job_id, None)
        .unwrap();
    assert!(!check.recoverable);
    assert!(check.unrecoverable);

    let report = env
        .service
        .recover(OWNER, Some(&response.job_id), None)
        .unwrap();
    assert!(report.recovered.is_empty());

    let detail = env.service.job_detail(OWNER, &response.job_id).unwrap();
    assert_eq!(detail.status, JobStatus::Done);
    assert!(detail
        .results
        .iter()
        .all(|r| r.file_name != RECOVERY_RESULT_NAME));
}
