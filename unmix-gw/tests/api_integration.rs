//! Gateway HTTP integration tests
//!
//! Drive the router directly (no socket) with stub collaborators and an
//! in-memory database, covering submission, status resolution, artifact
//! streaming and the error surface.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use unmix_common::jobs::Job;
use unmix_common::media::{AudioFormat, MediaTree};
use unmix_common::store::{init_database_pool, JobStore};
use unmix_gw::analyze::{AnalyzeError, TrackAnalysis, TrackAnalyzer};
use unmix_gw::fetch::{FetchError, SourceFetcher};
use unmix_gw::{build_router, AppState};

/// Stub acquisition: sources containing "fail" fail, everything else
/// lands as `staged/abc123.mp3`.
struct StubFetcher;

impl SourceFetcher for StubFetcher {
    fn fetch(&self, source: &str, staged_dir: &Path) -> Result<std::path::PathBuf, FetchError> {
        if source.contains("fail") {
            return Err(FetchError::DownloadFailed("boom".to_string()));
        }
        let path = staged_dir.join("abc123.mp3");
        std::fs::write(&path, b"original-mix").unwrap();
        Ok(path)
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

struct StubAnalyzer;

impl TrackAnalyzer for StubAnalyzer {
    fn analyze(&self, _audio_path: &Path) -> Result<TrackAnalysis, AnalyzeError> {
        Ok(TrackAnalysis {
            key: Some("C".to_string()),
            scale: Some("major".to_string()),
            bpm: Some(120.0),
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

struct TestApp {
    app: Router,
    store: JobStore,
    media: Arc<MediaTree>,
    _root: TempDir,
}

async fn test_app() -> TestApp {
    let root = TempDir::new().unwrap();
    let pool = init_database_pool(&root.path().join("unmix.db"))
        .await
        .unwrap();
    let store = JobStore::new(pool);

    let media = Arc::new(MediaTree::new(root.path()));
    media.ensure().unwrap();

    let state = AppState::new(
        store.clone(),
        media.clone(),
        Arc::new(StubFetcher),
        Arc::new(StubAnalyzer),
        None,
    );

    TestApp {
        app: build_router(state),
        store,
        media,
        _root: root,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Full vocabulary payload for a song id
fn full_stems(song_id: &str) -> Value {
    json!({
        "vocals": format!("/artifacts/{}/vocals.mp3", song_id),
        "drums": format!("/artifacts/{}/drums.mp3", song_id),
        "bass": format!("/artifacts/{}/bass.mp3", song_id),
        "other": format!("/artifacts/{}/other.mp3", song_id),
    })
}

/// Enqueue and claim a job so it can be driven to a terminal state
async fn started_job(t: &TestApp, song_id: &str) -> Job {
    let job = Job::new("src".to_string(), song_id.to_string(), "/tmp/in.mp3".to_string());
    t.store.enqueue(&job).await.unwrap();
    t.store.claim_next().await.unwrap().unwrap();
    job
}

// ── submission ────────────────────────────────────────────────────

#[tokio::test]
async fn generate_returns_a_job_handle() {
    let t = test_app().await;

    let (status, body) = send_json(
        &t.app,
        post_json("/generate", json!({ "source": "https://y/watch?v=abc123" })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap();
    assert_eq!(
        body["status_url"].as_str().unwrap(),
        format!("/status/{}", job_id)
    );
    assert_eq!(body["original_url"], "/source/abc123.mp3");

    // The acquired original is staged under its song id
    assert!(t.media.staged_dir().join("abc123.mp3").exists());
}

#[tokio::test]
async fn generate_rejects_a_missing_or_blank_source() {
    let t = test_app().await;

    let (status, body) = send_json(&t.app, post_json("/generate", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send_json(&t.app, post_json("/generate", json!({ "source": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_accepts_the_legacy_field_name() {
    let t = test_app().await;

    let (status, _) = send_json(
        &t.app,
        post_json("/generate", json!({ "url1": "https://y/watch?v=abc123" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn acquisition_failure_creates_no_job_state() {
    let t = test_app().await;

    let (status, body) = send_json(
        &t.app,
        post_json("/generate", json!({ "source": "https://y/watch?v=fail" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "COLLABORATOR_FAILED");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(t.store.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

// ── status resolution ─────────────────────────────────────────────

#[tokio::test]
async fn status_is_reachable_immediately_after_submission() {
    let t = test_app().await;

    let (_, body) = send_json(
        &t.app,
        post_json("/generate", json!({ "source": "https://y/watch?v=abc123" })),
    )
    .await;
    let status_url = body["status_url"].as_str().unwrap().to_string();

    let (status, body) = send_json(&t.app, get(&status_url)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(["PENDING", "STARTED", "RETRY", "SUCCESS", "FAILURE"]
        .contains(&body["state"].as_str().unwrap()));
}

#[tokio::test]
async fn unknown_job_reports_pending() {
    let t = test_app().await;

    let (status, body) = send_json(
        &t.app,
        get(&format!("/status/{}", uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["state"], "PENDING");
}

#[tokio::test]
async fn success_exposes_flat_stems_and_original_url() {
    let t = test_app().await;
    let job = started_job(&t, "abc").await;

    // Worker wrote the legacy nested shape; readers still see flat
    t.store
        .mark_success(job.job_id, json!({ "result": full_stems("abc") }))
        .await
        .unwrap();

    let (status, body) = send_json(&t.app, get(&format!("/status/{}", job.job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "SUCCESS");
    assert_eq!(body["stems"]["vocals"], "/artifacts/abc/vocals.mp3");
    assert_eq!(body["stems"]["drums"], "/artifacts/abc/drums.mp3");
    assert_eq!(body["original_url"], "/source/abc.mp3");
}

#[tokio::test]
async fn success_without_a_stored_song_id_derives_it_from_stem_paths() {
    let t = test_app().await;

    // Legacy row: no song identity threaded through
    let job = Job::new("src".to_string(), String::new(), "/tmp/in.mp3".to_string());
    t.store.enqueue(&job).await.unwrap();
    t.store.claim_next().await.unwrap().unwrap();
    t.store.mark_success(job.job_id, full_stems("abc")).await.unwrap();

    let (status, body) = send_json(&t.app, get(&format!("/status/{}", job.job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["original_url"], "/source/abc.mp3");
}

#[tokio::test]
async fn failure_surfaces_a_sanitized_error_with_500() {
    let t = test_app().await;
    let job = started_job(&t, "abc").await;
    t.store
        .mark_failure(job.job_id, "Separation failed: model out of memory")
        .await
        .unwrap();

    let (status, body) = send_json(&t.app, get(&format!("/status/{}", job.job_id))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["state"], "FAILURE");
    assert!(body["error"].as_str().unwrap().contains("out of memory"));
}

#[tokio::test]
async fn terminal_status_payloads_are_byte_identical() {
    let t = test_app().await;

    let success = started_job(&t, "abc").await;
    t.store.mark_success(success.job_id, full_stems("abc")).await.unwrap();

    let failure = started_job(&t, "xyz").await;
    t.store.mark_failure(failure.job_id, "model out of memory").await.unwrap();

    for job_id in [success.job_id, failure.job_id] {
        let uri = format!("/status/{}", job_id);
        let (first_status, first_body) = send(&t.app, get(&uri)).await;
        let (second_status, second_body) = send(&t.app, get(&uri)).await;
        assert_eq!(first_status, second_status);
        assert_eq!(first_body, second_body);
    }
}

#[tokio::test]
async fn success_with_zero_stems_is_reported_as_a_defect() {
    let t = test_app().await;
    let job = started_job(&t, "abc").await;

    // The store refuses to write this shape; force the legacy bad row
    // directly to exercise the read-side guard.
    sqlx::query("UPDATE jobs SET state = 'SUCCESS', stems = '{}' WHERE job_id = ?")
        .bind(job.job_id.to_string())
        .execute(t.store.pool())
        .await
        .unwrap();

    let (status, body) = send_json(&t.app, get(&format!("/status/{}", job.job_id))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "DEFECT");
}

// ── artifact and source streaming ─────────────────────────────────

#[tokio::test]
async fn artifacts_are_not_found_before_the_worker_writes_them() {
    let t = test_app().await;
    // The job exists, but no SUCCESS yet and nothing on disk
    started_job(&t, "abc").await;

    let (status, _) = send(&t.app, get("/artifacts/abc/bass.mp3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn artifacts_stream_exactly_the_bytes_the_worker_wrote() {
    let t = test_app().await;

    let path = t.media.artifact_path("abc", "vocals", AudioFormat::Mp3).unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"id3-vocals-frames").unwrap();

    let (status, body) = send(&t.app, get("/artifacts/abc/vocals.mp3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"id3-vocals-frames");
}

#[tokio::test]
async fn artifact_streaming_honors_range_requests() {
    let t = test_app().await;

    let path = t.media.artifact_path("abc", "drums", AudioFormat::Wav).unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"RIFFxxxxWAVE").unwrap();

    let request = Request::builder()
        .uri("/artifacts/abc/drums.wav")
        .header(header::RANGE, "bytes=0-3")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body, b"RIFF");
}

#[tokio::test]
async fn the_original_mix_streams_from_the_staging_tree() {
    let t = test_app().await;
    std::fs::write(t.media.staged_dir().join("abc.mp3"), b"original-mix").unwrap();

    let (status, body) = send(&t.app, get("/source/abc.mp3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"original-mix");

    let (status, _) = send(&t.app, get("/source/missing.mp3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn path_traversal_attempts_are_not_found() {
    let t = test_app().await;

    // A file outside the managed roots that must stay unreachable even
    // though a traversing path would resolve to it
    let root = t.media.artifacts_dir().parent().unwrap();
    std::fs::write(root.join("secret.mp3"), b"secret").unwrap();

    let (status, _) = send(&t.app, get("/artifacts/abc/..%2F..%2Fsecret.mp3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, get("/artifacts/..%2F../vocals.mp3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, get("/source/..%2Fsecret.mp3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, get("/artifacts/abc/vocals.flac")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── utility endpoints ─────────────────────────────────────────────

#[tokio::test]
async fn health_reports_module_identity() {
    let t = test_app().await;

    let (status, body) = send_json(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "unmix-gw");
}

#[tokio::test]
async fn analyze_returns_the_collaborator_summary() {
    let t = test_app().await;

    let (status, body) = send_json(
        &t.app,
        post_json("/analyze", json!({ "source": "https://y/watch?v=abc123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "C");
    assert_eq!(body["scale"], "major");
    assert_eq!(body["bpm"], 120.0);
}

#[tokio::test]
async fn search_without_a_credential_is_unavailable() {
    let t = test_app().await;

    let (status, body) = send_json(&t.app, get("/search?q=test")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "UNAVAILABLE");
}
