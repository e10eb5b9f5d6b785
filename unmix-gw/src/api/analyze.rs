//! Key/tempo analysis endpoint
//!
//! POST /analyze: acquire the source like /generate does, then run the
//! analysis collaborator on it synchronously. Utility endpoint; no job
//! state is involved.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::analyze::TrackAnalysis;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /analyze request
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Source reference, same contract as /generate
    #[serde(default, alias = "url")]
    pub source: Option<String>,
}

/// POST /analyze
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<TrackAnalysis>> {
    let source = request
        .source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing source reference".to_string()))?
        .to_string();

    let fetcher = state.fetcher.clone();
    let analyzer = state.analyzer.clone();
    let staged_dir = state.media.staged_dir().to_path_buf();

    let analysis = tokio::task::spawn_blocking(move || {
        let acquired = fetcher
            .fetch(&source, &staged_dir)
            .map_err(|e| ApiError::BadGateway(e.to_string()))?;
        analyzer
            .analyze(&acquired)
            .map_err(|e| ApiError::BadGateway(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Analysis task panicked: {}", e)))??;

    Ok(Json(analysis))
}

/// Build analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze))
}
