//! API integration tests.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use vtx_api::{create_router, ApiConfig, AppState};
use vtx_queue::{JobQueuePort, MemoryJobQueue};
use vtx_storage::{BlobStateStore, MemoryBlobStore};
use vtx_worker::JobService;

/// Router over in-memory storage and queue.
fn create_test_router() -> (axum::Router, Arc<MemoryJobQueue>) {
    let blobs = Arc::new(MemoryBlobStore::new());
    let state = Arc::new(BlobStateStore::new(blobs.clone()));
    let queue = Arc::new(MemoryJobQueue::new());
    let service = JobService::new(state.clone(), state, blobs, queue.clone(), 3);

    let app = create_router(
        AppState::with_service(ApiConfig::default(), service),
        None,
    );
    (app, queue)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_job(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Test health endpoint.
#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_router();
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let (app, _) = create_test_router();
    let (status, body) = send(&app, get("/ready")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["storage"]["status"], "ok");
    assert_eq!(body["checks"]["queue"]["status"], "ok");
}

/// Metrics are only routed when a handle is supplied.
#[tokio::test]
async fn test_metrics_endpoint_disabled() {
    let (app, _) = create_test_router();
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submit_then_poll_job() {
    let (app, queue) = create_test_router();

    let (status, created) = send(
        &app,
        post_job(json!({
            "source_uri": "s3://videos/lecture.mp4",
            "declared_duration_secs": 600.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(created["status"], "queued");
    assert_eq!(queue.len().await.unwrap(), 1);

    let job_id = created["job_id"].as_str().unwrap();
    let (status, job) = send(&app, get(&format!("/api/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["stage"], "queued");
    assert_eq!(job["total_frames"], 1800);
    assert_eq!(job["frames_completed"], 0);
    assert_eq!(job["progress"], 0);
    assert_eq!(job["is_terminal"], false);

    let (status, artifacts) = send(&app, get(&format!("/api/jobs/{}/artifacts", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(artifacts["artifacts"], json!([]));
}

#[tokio::test]
async fn test_submit_rejects_invalid_requests() {
    let (app, queue) = create_test_router();

    let (status, body) = send(
        &app,
        post_job(json!({ "source_uri": "", "declared_duration_secs": 600.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("source_uri"));

    let (status, _) = send(
        &app,
        post_job(json!({ "source_uri": "s3://videos/a.mp4", "declared_duration_secs": -5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        post_job(json!({ "source_uri": "s3://videos/a.mp4", "declared_duration_secs": 1e18 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("declared_duration_secs"));

    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_and_malformed_job_ids() {
    let (app, _) = create_test_router();

    let (status, _) = send(&app, get("/api/jobs/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/jobs/does-not-exist/artifacts")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/jobs/bad.id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_security_and_request_id_headers() {
    let (app, _) = create_test_router();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let headers = response.headers();
    assert!(headers.contains_key("X-Content-Type-Options"));
    assert!(headers.contains_key("X-Frame-Options"));
    assert_eq!(headers["x-request-id"], "req-123");

    let response = app.oneshot(get("/health")).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

/// Test against a running server with real storage and Redis.
#[tokio::test]
#[ignore = "requires Redis and blob storage configuration"]
async fn test_full_app_state_from_env() {
    dotenvy::dotenv().ok();

    let state = AppState::new(ApiConfig::from_env())
        .await
        .expect("Failed to create application state");
    let app = create_router(state, None);

    let (status, body) = send(&app, get("/ready")).await;
    println!("Readiness: {} {}", status, body);
    assert_eq!(status, StatusCode::OK);
}
