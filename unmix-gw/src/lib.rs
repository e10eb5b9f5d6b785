//! unmix-gw library interface
//!
//! Exposes the application state and router so integration tests can
//! drive the HTTP surface without binding a socket.

pub mod analyze;
pub mod api;
pub mod error;
pub mod fetch;
pub mod search;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use unmix_common::media::MediaTree;
use unmix_common::store::JobStore;

use crate::analyze::TrackAnalyzer;
use crate::fetch::SourceFetcher;
use crate::search::SearchClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Shared job store (queue + results)
    pub store: JobStore,
    /// Staging/artifact roots
    pub media: Arc<MediaTree>,
    /// Acquisition collaborator
    pub fetcher: Arc<dyn SourceFetcher>,
    /// Key/tempo analysis collaborator
    pub analyzer: Arc<dyn TrackAnalyzer>,
    /// Video search proxy; None when no credential is configured
    pub search: Option<Arc<SearchClient>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: JobStore,
        media: Arc<MediaTree>,
        fetcher: Arc<dyn SourceFetcher>,
        analyzer: Arc<dyn TrackAnalyzer>,
        search: Option<Arc<SearchClient>>,
    ) -> Self {
        Self {
            store,
            media,
            fetcher,
            analyzer,
            search,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::generate_routes())
        .merge(api::status_routes())
        .merge(api::media_routes())
        .merge(api::analyze_routes())
        .merge(api::search_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
