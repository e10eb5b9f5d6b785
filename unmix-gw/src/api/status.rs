//! Job status endpoint (state resolver)
//!
//! GET /status/{job_id}: resolve the job row into the canonical client
//! payload. The store already normalized result shapes at write time, so
//! this side only derives secondary fields and picks status codes:
//! 202 for PENDING/STARTED/RETRY, 200 for SUCCESS, 500 for FAILURE.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use unmix_common::jobs::{Job, JobState, StemMap};
use unmix_common::media::{song_id_from_stem_url, source_url};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /status/{job_id} response
///
/// Field order is fixed and stem maps are ordered, so terminal payloads
/// are byte-identical across repeated polls.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stems: Option<StemMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /status/{job_id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<StatusResponse>)> {
    let job = state.store.load(job_id).await?;
    tracing::debug!(job_id = %job_id, state = ?job.as_ref().map(|j| j.state), "Status query");
    resolve_status(job)
}

/// Resolve a job row (or its absence) into the client payload.
fn resolve_status(job: Option<Job>) -> ApiResult<(StatusCode, Json<StatusResponse>)> {
    let Some(job) = job else {
        // No record yet: indistinguishable from a job no worker has
        // claimed, so report PENDING.
        return Ok((
            StatusCode::ACCEPTED,
            Json(StatusResponse {
                state: JobState::Pending,
                stems: None,
                original_url: None,
                error: None,
            }),
        ));
    };

    match job.state {
        JobState::Pending | JobState::Started | JobState::Retry => Ok((
            StatusCode::ACCEPTED,
            Json(StatusResponse {
                state: job.state,
                stems: None,
                original_url: None,
                error: None,
            }),
        )),

        JobState::Success => {
            // A SUCCESS with zero stems is an invariant violation, not a
            // success payload
            let Some(first_stem) = job.stems.values().next() else {
                return Err(ApiError::Defect(format!(
                    "Job {} is SUCCESS with zero stems",
                    job.job_id
                )));
            };

            // Prefer the identity derived at submission; fall back to
            // inferring it from any surviving stem path.
            let song_id = if job.song_id.is_empty() {
                song_id_from_stem_url(first_stem)?
            } else {
                job.song_id.clone()
            };

            Ok((
                StatusCode::OK,
                Json(StatusResponse {
                    state: JobState::Success,
                    stems: Some(job.stems),
                    original_url: Some(source_url(&song_id)),
                    error: None,
                }),
            ))
        }

        JobState::Failure => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatusResponse {
                state: JobState::Failure,
                stems: None,
                original_url: None,
                error: Some(
                    job.error
                        .unwrap_or_else(|| "Unknown worker failure".to_string()),
                ),
            }),
        )),
    }
}

/// Build status routes
pub fn status_routes() -> Router<AppState> {
    Router::new().route("/status/:job_id", get(get_status))
}
