//! Artifact and original-source streaming
//!
//! GET /artifacts/{song_id}/{stem}.{ext} and GET /source/{song_id}.mp3.
//! Requested identities are validated to stay inside the managed roots,
//! then handed to tower-http's `ServeFile`, which streams with
//! conditional/range support instead of a pre-computed fixed length.
//! Existence on disk is the only readiness gate: stems appear here only
//! once the worker has written them.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::Response,
    routing::get,
    Router,
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use unmix_common::media::{validate_component, AudioFormat};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /artifacts/{song_id}/{stem}.{ext}
///
/// Stream a single separated stem (bass.mp3, drums.wav, ...).
pub async fn get_stem(
    State(state): State<AppState>,
    Path((song_id, file)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let (stem, format) = parse_artifact_name(&file)?;

    let path = state
        .media
        .artifact_path(&song_id, stem, format)
        .map_err(|_| not_found(&song_id, &file))?;

    if tokio::fs::metadata(&path).await.is_err() {
        return Err(not_found(&song_id, &file));
    }

    serve_file(path, request).await
}

/// GET /source/{song_id}.mp3
///
/// Stream the un-separated original so clients can draw a waveform.
pub async fn get_source(
    State(state): State<AppState>,
    Path(file): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let song_id = file
        .strip_suffix(".mp3")
        .ok_or_else(|| ApiError::NotFound(format!("No such source: {}", file)))?;

    let path = state
        .media
        .source_path(song_id)
        .map_err(|_| ApiError::NotFound(format!("No such source: {}", file)))?;

    if tokio::fs::metadata(&path).await.is_err() {
        return Err(ApiError::NotFound(format!("No such source: {}", file)));
    }

    serve_file(path, request).await
}

/// Split "vocals.mp3" into a validated (stem, format) pair.
fn parse_artifact_name(file: &str) -> ApiResult<(&str, AudioFormat)> {
    let (stem, ext) = file
        .rsplit_once('.')
        .ok_or_else(|| ApiError::NotFound(format!("No such artifact: {}", file)))?;

    let format = AudioFormat::from_extension(ext)
        .ok_or_else(|| ApiError::NotFound(format!("No such artifact: {}", file)))?;

    validate_component(stem).map_err(|_| ApiError::NotFound(format!("No such artifact: {}", file)))?;

    Ok((stem, format))
}

fn not_found(song_id: &str, file: &str) -> ApiError {
    ApiError::NotFound(format!("No such artifact: {}/{}", song_id, file))
}

/// Delegate streaming to ServeFile so range/conditional requests work.
async fn serve_file(path: std::path::PathBuf, request: Request) -> ApiResult<Response> {
    let response = ServeFile::new(&path)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::Internal(format!("File service error: {}", e)))?;

    Ok(response.map(Body::new))
}

/// Build media streaming routes
pub fn media_routes() -> Router<AppState> {
    Router::new()
        .route("/artifacts/:song_id/:file", get(get_stem))
        .route("/source/:file", get(get_source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_parse_into_stem_and_format() {
        let (stem, format) = parse_artifact_name("vocals.mp3").unwrap();
        assert_eq!(stem, "vocals");
        assert_eq!(format, AudioFormat::Mp3);

        let (stem, format) = parse_artifact_name("other.wav").unwrap();
        assert_eq!(stem, "other");
        assert_eq!(format, AudioFormat::Wav);
    }

    #[test]
    fn unknown_extensions_and_traversal_are_not_found() {
        assert!(parse_artifact_name("vocals.flac").is_err());
        assert!(parse_artifact_name("vocals").is_err());
        assert!(parse_artifact_name("...mp3").is_err());
        assert!(parse_artifact_name(".mp3").is_err());
    }
}
