//! API integration tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use base64::Engine;
use metrics_exporter_prometheus::PrometheusBuilder;
use tempfile::TempDir;
use tower::ServiceExt;

use aqua_api::services::JobHandle;
use aqua_api::{create_router, ApiConfig, AppState, PipelineSettings};
use aqua_media::{AnnotationResult, Annotator, Frame, JobWorkspace};
use aqua_models::JobId;

const BOUNDARY: &str = "aquafun-test-boundary";

struct Passthrough;

impl Annotator for Passthrough {
    fn annotate(&self, frame: &Frame) -> AnnotationResult {
        Ok(frame.clone())
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

fn test_config(work_dir: &TempDir) -> ApiConfig {
    ApiConfig {
        work_dir: work_dir.path().to_path_buf(),
        rate_limit_rps: 1000,
        rate_limit_burst: 1000,
        ..ApiConfig::default()
    }
}

fn create_test_router(config: ApiConfig) -> Router {
    let state = AppState::with_annotator(config, PipelineSettings::default(), Arc::new(Passthrough));
    create_router(state, None)
}

fn multipart_body(field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, file_name, content)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn json_body(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Register a completed job whose annotated video holds `content`.
async fn completed_job(state: &AppState, work_dir: &TempDir, content: &[u8]) -> String {
    let workspace = JobWorkspace::create(work_dir.path(), "mp4").await.unwrap();
    tokio::fs::write(workspace.output_path(), content)
        .await
        .unwrap();

    let job = Arc::new(JobHandle::new(
        JobId::new(),
        Some("tank.mp4".to_string()),
        workspace,
    ));
    job.update(|s| s.complete(3, 0)).await;
    let job_id = job.id().to_string();
    state.jobs.insert(job).await;
    job_id
}

/// Poll a job until it reaches a terminal status.
async fn wait_for_terminal(app: &Router, job_id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/jobs/{job_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = json_body(response).await;
        if matches!(
            job["status"].as_str(),
            Some("completed" | "failed" | "cancelled")
        ) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_index_page_served() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/html"));
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("Welcome to AquaFun"));
    assert!(html.contains("name=\"video\""));
    assert!(html.contains("/download-link"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let state = AppState::with_annotator(
        test_config(&dir),
        PipelineSettings::default(),
        Arc::new(Passthrough),
    );
    let app = create_router(state, Some(handle));

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_job_lookup_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app.clone().oneshot(get("/api/jobs/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get("/api/jobs/550e8400-e29b-41d4-a716-446655440000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "Not found: Job not found");
}

#[tokio::test]
async fn test_upload_rejects_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app
        .oneshot(upload_request("video", "notes.txt", b"hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "input");
}

#[tokio::test]
async fn test_upload_rejects_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app
        .oneshot(upload_request("video", "tank.mp4", b""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The rejected upload leaves no job directory behind
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_upload_requires_video_field() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app
        .oneshot(upload_request("file", "tank.mp4", b"data"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = PipelineSettings::default();
    settings.limits = settings.limits.with_max_file_size_bytes(16);
    let state = AppState::with_annotator(test_config(&dir), settings, Arc::new(Passthrough));
    let app = create_router(state, None);

    let response = app
        .oneshot(upload_request("video", "tank.mp4", &[7u8; 64]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_unreadable_video_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_router(test_config(&dir));

    let response = app
        .clone()
        .oneshot(upload_request("video", "tank.mp4", b"not really an mp4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job = json_body(response).await;
    assert_eq!(job["source_name"], "tank.mp4");
    let job_id = job["job_id"].as_str().unwrap().to_string();

    // Results are never served before completion
    for suffix in ["video", "download", "download-link"] {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/jobs/{job_id}/{suffix}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT, "{suffix}");
    }

    let job = wait_for_terminal(&app, &job_id).await;
    assert_eq!(job["status"], "failed");
    assert!(job["error_message"].is_string());

    let response = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{job_id}/video")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Finished jobs cannot be cancelled
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/jobs/{job_id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_completed_job_delivers_annotated_video() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::with_annotator(
        test_config(&dir),
        PipelineSettings::default(),
        Arc::new(Passthrough),
    );
    let content: Vec<u8> = (0u8..100).collect();
    let job_id = completed_job(&state, &dir, &content).await;
    let app = create_router(state, None);

    let job = json_body(
        app.clone()
            .oneshot(get(&format!("/api/jobs/{job_id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["status_text"], "Detection complete!");
    assert_eq!(job["progress"], 100);

    // Inline playback of the whole file
    let response = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{job_id}/video")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(body_bytes(response).await, content);

    // Seeking
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{job_id}/video"))
                .header(header::RANGE, "bytes=10-19")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 10-19/100"
    );
    assert_eq!(body_bytes(response).await, &content[10..20]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{job_id}/video"))
                .header(header::RANGE, "bytes=500-")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */100"
    );

    // Attachment download
    let response = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{job_id}/download")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"detected.mp4\""
    );
    assert_eq!(body_bytes(response).await, content);

    // Self-contained link embeds the same bytes
    let response = app
        .oneshot(get(&format!("/api/jobs/{job_id}/download-link")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let link = json_body(response).await;
    assert_eq!(link["filename"], "detected.mp4");
    let href = link["href"].as_str().unwrap();
    let encoded = href.strip_prefix("data:video/mp4;base64,").unwrap();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    assert_eq!(decoded, content);
}

#[tokio::test]
async fn test_rate_limiting() {
    let dir = tempfile::tempdir().unwrap();
    let config = ApiConfig {
        rate_limit_rps: 1,
        rate_limit_burst: 2,
        ..test_config(&dir)
    };
    let app = create_test_router(config);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/550e8400-e29b-41d4-a716-446655440000")
                    .header("X-Forwarded-For", "192.168.1.100")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::NOT_FOUND,
            StatusCode::NOT_FOUND,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
}
