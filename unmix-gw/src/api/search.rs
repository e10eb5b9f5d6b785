//! Video search proxy endpoint
//!
//! GET /search?q=...: forwards to the external search API with the
//! configured credential. 503 when no credential was configured at
//! startup.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::search::SearchHit;
use crate::AppState;

/// GET /search query parameters
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

/// GET /search
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Missing query parameter 'q'".to_string()));
    }

    let client = state.search.as_ref().ok_or_else(|| {
        ApiError::Unavailable("Search is not configured (no API credential)".to_string())
    })?;

    let hits = client
        .search(query)
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    Ok(Json(hits))
}

/// Build search routes
pub fn search_routes() -> Router<AppState> {
    Router::new().route("/search", get(search))
}
