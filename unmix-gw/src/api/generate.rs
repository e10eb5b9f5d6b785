//! Job submission endpoint
//!
//! POST /generate: acquire the source synchronously, enqueue a separation
//! job, hand back a polling handle. Acquisition failure surfaces here as
//! 502 and leaves no job state behind.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use unmix_common::jobs::Job;
use unmix_common::media::{song_id_from_path, source_url};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /generate request
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Source reference (URL or opaque identifier). `url1` is the field
    /// name older clients send.
    #[serde(default, alias = "url1")]
    pub source: Option<String>,
}

/// POST /generate response
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub job_id: Uuid,
    pub status_url: String,
    pub original_url: String,
}

/// POST /generate
///
/// Returns 202 Accepted with the job handle once the source is staged and
/// the job is enqueued.
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<(StatusCode, Json<GenerateResponse>)> {
    let source = request
        .source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing source reference".to_string()))?
        .to_string();

    // Acquisition is synchronous on the submission path: the download
    // blocks this request, and on failure the job is never created.
    let fetcher = state.fetcher.clone();
    let staged_dir = state.media.staged_dir().to_path_buf();
    let fetch_source = source.clone();
    let acquired = tokio::task::spawn_blocking(move || fetcher.fetch(&fetch_source, &staged_dir))
        .await
        .map_err(|e| ApiError::Internal(format!("Acquisition task panicked: {}", e)))?
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    // SongIdentity is derived exactly once, before enqueue
    let song_id = song_id_from_path(&acquired)?;

    let job = Job::new(source, song_id.clone(), acquired.display().to_string());
    state.store.enqueue(&job).await?;

    tracing::info!(
        job_id = %job.job_id,
        song_id = %song_id,
        "Separation job enqueued"
    );

    let response = GenerateResponse {
        job_id: job.job_id,
        status_url: format!("/status/{}", job.job_id),
        original_url: source_url(&song_id),
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Build submission routes
pub fn generate_routes() -> Router<AppState> {
    Router::new().route("/generate", post(generate))
}
