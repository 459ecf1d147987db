//! Report fetch against a local HTTP server

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use qadash_common::{RunStatus, StepResult};
use qadash_engine::channel::ReportOutcome;
use qadash_engine::{EngineConfig, IngestSource, MountExit, ReportFetchChannel, RunMount, RunView, RunViewHandle};
use tokio_util::sync::CancellationToken;

async fn serve(app: Router) -> EngineConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    EngineConfig {
        base_url: format!("http://{}", addr),
        ..Default::default()
    }
}

fn report_body() -> serde_json::Value {
    json!({
        "meta": {"runId": "r1", "status": "FAIL", "elapsedMs": 1500},
        "steps": [
            {"sheet": "Login", "no": 2, "name": "Tap login", "result": "fail", "reason": "Timeout"},
            {"sheet": "Login", "no": 1, "name": "Open app", "result": "ok", "elapsedMs": 300},
            {"no": 1, "name": "Warm up", "result": "skip"}
        ],
        "rawLines": ["STEP_OK no=1", "STEP_FAIL no=2"]
    })
}

#[tokio::test]
async fn test_second_candidate_wins() {
    let app = Router::new()
        .route("/runs/:run_id/report", get(|| async { StatusCode::NOT_FOUND }))
        .route("/run-results/:run_id", get(|| async { Json(report_body()) }));
    let config = serve(app).await;

    let channel = ReportFetchChannel::from_config(&config, "r1").unwrap();
    let (mut handle, rx) = RunViewHandle::new(RunView::new("r1", config.log_capacity));
    let outcome = channel.run(&mut handle, &CancellationToken::new()).await;

    assert_eq!(
        outcome,
        ReportOutcome::Hydrated {
            url: format!("{}/run-results/r1", config.base_url)
        }
    );

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.meta.status, RunStatus::Fail);
    assert_eq!(snapshot.meta.elapsed_ms, Some(1500));
    assert!(snapshot.terminal);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.raw_lines.len(), 2);

    let ids: Vec<_> = snapshot.steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["#1", "Login#1", "Login#2"]);
    assert_eq!(snapshot.steps[0].result, StepResult::Skip);
    assert_eq!(snapshot.steps[2].reason.as_deref(), Some("Timeout"));
}

#[tokio::test]
async fn test_undecodable_body_tries_next_candidate() {
    let app = Router::new()
        .route("/runs/:run_id/report", get(|| async { "<html>login</html>" }))
        .route("/run-results/:run_id", get(|| async { Json(report_body()) }));
    let config = serve(app).await;

    let channel = ReportFetchChannel::from_config(&config, "r1").unwrap();
    let (url, report) = channel.fetch().await.unwrap();
    assert!(url.ends_with("/run-results/r1"));
    assert_eq!(report.steps.len(), 3);
}

#[tokio::test]
async fn test_exhausted_candidates_surface_error() {
    let app = Router::new().route(
        "/run-results/:run_id",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let config = serve(app).await;

    let channel = ReportFetchChannel::from_config(&config, "r9").unwrap();
    let (mut handle, rx) = RunViewHandle::new(RunView::new("r9", config.log_capacity));
    let outcome = channel.run(&mut handle, &CancellationToken::new()).await;
    assert_eq!(outcome, ReportOutcome::Exhausted);

    let snapshot = rx.borrow().clone();
    assert!(snapshot.terminal);
    let error = snapshot.error.unwrap();
    assert!(error.contains("2 endpoint(s)"), "{}", error);
    assert!(error.contains("HTTP 500"), "{}", error);
}

#[tokio::test]
async fn test_disposed_mount_discards_late_report() {
    let app = Router::new().route(
        "/runs/:run_id/report",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(report_body())
        }),
    );
    let config = serve(app).await;

    let mount = RunMount::mount("r1", IngestSource::report(&config, "r1").unwrap(), &config);
    let rx = mount.subscribe();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(mount.dispose().await, Some(MountExit::Report(ReportOutcome::Stale)));
    let snapshot = rx.borrow().clone();
    assert!(snapshot.steps.is_empty());
    assert_eq!(snapshot.error, None);
    assert!(!snapshot.terminal);
}
