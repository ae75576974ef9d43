//! Single-transfer behaviour against a mock HTTP server

mod common;

use common::{engine_config, payload, silent_server, stalling_server};
use photo_download::download::{
    Signal, ThrottleController, TransferEvent, TransferExecutor, TransferJob, TransferOutcome,
};
use photo_download::error::TransferError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor(bytes_per_sec: u64) -> TransferExecutor {
    TransferExecutor::new(
        engine_config().transfer,
        Arc::new(ThrottleController::new(bytes_per_sec)),
    )
    .unwrap()
}

fn executor_with_stall(stall_ms: u64) -> TransferExecutor {
    let mut config = engine_config().transfer;
    config.stall_timeout_ms = stall_ms;
    TransferExecutor::new(config, Arc::new(ThrottleController::new(0))).unwrap()
}

fn job(url: String, dir: &Path, resume: bool) -> TransferJob {
    TransferJob {
        id: "item-1".into(),
        worker_id: 1,
        url,
        part_path: dir.join("photo.jpg.part"),
        final_path: dir.join("photo.jpg"),
        resume,
    }
}

async fn run(
    executor: &TransferExecutor,
    job: &TransferJob,
) -> (
    Result<TransferOutcome, TransferError>,
    Vec<TransferEvent>,
) {
    let (_signal_tx, mut signal_rx) = watch::channel(Signal::Run);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let result = executor.run(job, &mut signal_rx, &events_tx).await;
    drop(events_tx);

    let mut events = Vec::new();
    while let Some(event) = events_rx.recv().await {
        events.push(event);
    }
    (result, events)
}

fn started_offset(events: &[TransferEvent]) -> Option<u64> {
    events.iter().find_map(|e| match e {
        TransferEvent::Started { offset, .. } => Some(*offset),
        _ => None,
    })
}

#[tokio::test]
async fn test_full_download() {
    let server = MockServer::start().await;
    let body = payload(20_000);
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", server.uri()), dir.path(), false);
    let (result, events) = run(&executor(0), &job).await;

    assert_eq!(result, Ok(TransferOutcome::Completed { bytes: 20_000 }));
    assert_eq!(std::fs::read(&job.final_path).unwrap(), body);
    assert!(!job.part_path.exists());
    assert_eq!(started_offset(&events), Some(0));

    // Progress never goes backwards and never passes the size
    let mut last = 0;
    for event in &events {
        if let TransferEvent::Progress { bytes, .. } = event {
            assert!(*bytes >= last && *bytes <= 20_000);
            last = *bytes;
        }
    }
}

#[tokio::test]
async fn test_resume_from_partial_file() {
    let server = MockServer::start().await;
    let body = payload(8192);
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .and(header("Range", "bytes=4096-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 4096-8191/8192")
                .set_body_bytes(body[4096..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", server.uri()), dir.path(), true);
    std::fs::write(&job.part_path, &body[..4096]).unwrap();

    let (result, events) = run(&executor(0), &job).await;

    assert_eq!(result, Ok(TransferOutcome::Completed { bytes: 8192 }));
    assert_eq!(started_offset(&events), Some(4096));
    assert_eq!(std::fs::read(&job.final_path).unwrap(), body);
}

#[tokio::test]
async fn test_resume_falls_back_when_range_ignored() {
    let server = MockServer::start().await;
    let body = payload(8192);
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", server.uri()), dir.path(), true);
    std::fs::write(&job.part_path, vec![b'x'; 4096]).unwrap();

    let (result, events) = run(&executor(0), &job).await;

    assert_eq!(result, Ok(TransferOutcome::Completed { bytes: 8192 }));
    assert_eq!(started_offset(&events), Some(0));
    assert_eq!(std::fs::read(&job.final_path).unwrap(), body);
}

#[tokio::test]
async fn test_rejected_range_restarts_from_zero() {
    let server = MockServer::start().await;
    let body = payload(4096);
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .and(header("Range", "bytes=9000-"))
        .respond_with(ResponseTemplate::new(416))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", server.uri()), dir.path(), true);
    std::fs::write(&job.part_path, vec![0u8; 9000]).unwrap();

    let (result, _) = run(&executor(0), &job).await;

    assert_eq!(result, Ok(TransferOutcome::Completed { bytes: 4096 }));
    assert_eq!(std::fs::read(&job.final_path).unwrap(), body);
}

#[tokio::test]
async fn test_not_found_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/missing.jpg", server.uri()), dir.path(), false);
    let (result, _) = run(&executor(0), &job).await;

    assert!(matches!(result, Err(TransferError::Terminal(_))), "{:?}", result);
    assert!(!job.final_path.exists());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/busy.jpg", server.uri()), dir.path(), false);
    let (result, _) = run(&executor(0), &job).await;

    assert!(matches!(result, Err(TransferError::Transient(_))), "{:?}", result);
}

#[tokio::test]
async fn test_invalid_url_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    for url in ["not a url", "ftp://example.com/photo.jpg"] {
        let job = job(url.to_string(), dir.path(), false);
        let (result, events) = run(&executor(0), &job).await;
        assert!(matches!(result, Err(TransferError::Terminal(_))), "{}: {:?}", url, result);
        assert!(events.is_empty());
    }
}

#[tokio::test]
async fn test_unreachable_host_is_transient() {
    // Nothing listens on the port once the server is dropped
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", uri), dir.path(), false);
    let (result, _) = run(&executor(0), &job).await;

    assert!(matches!(result, Err(TransferError::Transient(_))), "{:?}", result);
}

/// Start a throttled transfer and stop it with `stop` once data is flowing
async fn stop_midway(stop: Signal) -> (TransferOutcome, TransferJob, tempfile::TempDir) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(64 * 1024)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", server.uri()), dir.path(), false);
    let executor = executor(8 * 1024);

    let (signal_tx, mut signal_rx) = watch::channel(Signal::Run);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let run = executor.run(&job, &mut signal_rx, &events_tx);
    let control = async {
        while let Some(event) = events_rx.recv().await {
            if matches!(event, TransferEvent::Progress { .. }) {
                break;
            }
        }
        signal_tx.send_replace(stop);
    };
    let (result, ()) = tokio::join!(run, control);

    (result.unwrap(), job, dir)
}

#[tokio::test]
async fn test_pause_keeps_partial_file() {
    let (outcome, job, _dir) = stop_midway(Signal::Pause).await;

    let TransferOutcome::Paused { bytes } = outcome else {
        panic!("expected pause, got {:?}", outcome);
    };
    assert!(bytes > 0 && bytes < 64 * 1024, "bytes = {}", bytes);
    assert_eq!(std::fs::metadata(&job.part_path).unwrap().len(), bytes);
    assert!(!job.final_path.exists());
}

#[tokio::test]
async fn test_cancel_removes_partial_file() {
    let (outcome, job, _dir) = stop_midway(Signal::Cancel).await;

    assert_eq!(outcome, TransferOutcome::Cancelled);
    assert!(!job.part_path.exists());
    assert!(!job.final_path.exists());
}

#[tokio::test]
async fn test_shutdown_keeps_partial_file() {
    let (outcome, job, _dir) = stop_midway(Signal::Shutdown).await;

    let TransferOutcome::Interrupted { bytes } = outcome else {
        panic!("expected interruption, got {:?}", outcome);
    };
    assert_eq!(std::fs::metadata(&job.part_path).unwrap().len(), bytes);
}

#[tokio::test]
async fn test_stop_while_waiting_for_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(payload(1024))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", server.uri()), dir.path(), false);
    let executor = executor(0);

    let (signal_tx, mut signal_rx) = watch::channel(Signal::Run);
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let run = executor.run(&job, &mut signal_rx, &events_tx);
    let control = async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        signal_tx.send_replace(Signal::Pause);
    };

    let started = std::time::Instant::now();
    let (result, ()) = tokio::join!(run, control);

    assert_eq!(result, Ok(TransferOutcome::Paused { bytes: 0 }));
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}

#[tokio::test]
async fn test_missing_response_headers_time_out() {
    let uri = silent_server().await;
    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", uri), dir.path(), false);

    let started = std::time::Instant::now();
    let (result, events) = run(&executor_with_stall(300), &job).await;

    match result {
        Err(TransferError::Transient(message)) => assert!(message.contains("no response")),
        other => panic!("expected transient failure, got {:?}", other),
    }
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_stalled_body_times_out() {
    let uri = stalling_server(8192, 1024).await;
    let dir = tempfile::tempdir().unwrap();
    let job = job(format!("{}/photo.jpg", uri), dir.path(), false);

    let started = std::time::Instant::now();
    let (result, events) = run(&executor_with_stall(300), &job).await;

    match result {
        Err(TransferError::Transient(message)) => assert!(message.contains("no data")),
        other => panic!("expected transient failure, got {:?}", other),
    }
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(started_offset(&events), Some(0));
    assert!(!job.final_path.exists());
}
