//! unmix-gw - Job Submission Gateway
//!
//! HTTP front door for the unmix services: accepts separation requests,
//! stages the source audio, enqueues jobs for the worker pool, answers
//! status polls, and streams finished artifacts. On shutdown it tears
//! down the staged/artifact trees; no job history survives a restart.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unmix_common::media::MediaTree;
use unmix_common::store::JobStore;
use unmix_gw::analyze::EssentiaAnalyzer;
use unmix_gw::fetch::YtDlpFetcher;
use unmix_gw::search::SearchClient;
use unmix_gw::AppState;

/// Command-line arguments for unmix-gw
#[derive(Parser, Debug)]
#[command(name = "unmix-gw")]
#[command(about = "Job submission gateway for unmix")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "UNMIX_GW_PORT")]
    port: u16,

    /// Root folder holding the database and media tree
    #[arg(short, long, env = "UNMIX_ROOT_FOLDER")]
    root_folder: Option<String>,

    /// API credential for the video search proxy (optional)
    #[arg(long, env = "UNMIX_SEARCH_API_KEY", hide_env_values = true)]
    search_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unmix_gw=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting unmix-gw (Job Submission Gateway)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve the shared root folder (CLI > env > config file > default)
    let root_folder =
        unmix_common::config::resolve_root_folder(args.root_folder.as_deref(), "UNMIX_ROOT_FOLDER")
            .context("Failed to resolve root folder")?;
    info!("Root folder: {}", root_folder.display());

    // Media tree is an owned handle: created here, torn down after the
    // server finishes its graceful shutdown.
    let media = Arc::new(MediaTree::new(&root_folder));
    media.ensure().context("Failed to create media tree")?;

    let db_path = unmix_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let pool = unmix_common::store::init_database_pool(&db_path).await?;
    let store = JobStore::new(pool);

    let fetcher = YtDlpFetcher::new();
    if !fetcher.is_available() {
        warn!("yt-dlp not found in PATH - submissions will fail until it is installed");
    }

    let analyzer = EssentiaAnalyzer::new();
    if !analyzer.is_available() {
        warn!("essentia_streaming_extractor_music not found in PATH - /analyze disabled");
    }

    let search = match args.search_api_key.filter(|k| !k.is_empty()) {
        Some(key) => {
            info!("Search proxy enabled");
            Some(Arc::new(SearchClient::new(key)?))
        }
        None => {
            info!("No search API credential configured - /search disabled");
            None
        }
    };

    let state = AppState::new(store, media.clone(), Arc::new(fetcher), Arc::new(analyzer), search);
    let app = unmix_gw::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Scoped teardown: remove staged sources and produced artifacts.
    info!("Shutting down - removing media tree");
    media.cleanup().context("Failed to clean up media tree")?;

    Ok(())
}

/// Resolve when the process is asked to stop (ctrl-c or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
