//! unmix-wk - Separation Worker
//!
//! Pulls jobs from the shared store, runs the separation collaborator on
//! the resolved compute device, persists and transcodes stems, and writes
//! terminal results. Runs any number of claim loops in one process;
//! additional processes scale the pool further.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unmix_common::media::MediaTree;
use unmix_common::store::JobStore;
use unmix_wk::device::resolve_device;
use unmix_wk::executor::{RetryPolicy, WorkerExecutor};
use unmix_wk::separate::DemucsSeparator;
use unmix_wk::transcode::FfmpegTranscoder;

/// Command-line arguments for unmix-wk
#[derive(Parser, Debug)]
#[command(name = "unmix-wk")]
#[command(about = "Separation worker for unmix")]
#[command(version)]
struct Args {
    /// Root folder holding the database and media tree
    #[arg(short, long, env = "UNMIX_ROOT_FOLDER")]
    root_folder: Option<String>,

    /// Number of concurrent claim loops in this process
    #[arg(short, long, default_value = "2", env = "UNMIX_WK_WORKERS")]
    workers: usize,

    /// Separation model name
    #[arg(long, default_value = "htdemucs", env = "UNMIX_WK_MODEL")]
    model: String,

    /// Maximum claims per job before it fails terminally
    #[arg(long, default_value = "1", env = "UNMIX_WK_MAX_ATTEMPTS")]
    max_attempts: u32,

    /// Delay before a failed attempt becomes claimable again, in seconds
    #[arg(long, default_value = "30", env = "UNMIX_WK_RETRY_BACKOFF_SECS")]
    retry_backoff_secs: u64,

    /// Idle poll interval, in milliseconds
    #[arg(long, default_value = "500", env = "UNMIX_WK_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unmix_wk=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting unmix-wk (Separation Worker)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder =
        unmix_common::config::resolve_root_folder(args.root_folder.as_deref(), "UNMIX_ROOT_FOLDER")
            .context("Failed to resolve root folder")?;
    info!("Root folder: {}", root_folder.display());

    let media = Arc::new(MediaTree::new(&root_folder));
    media.ensure().context("Failed to create media tree")?;

    let db_path = unmix_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let pool = unmix_common::store::init_database_pool(&db_path).await?;
    let store = JobStore::new(pool);

    let separator = DemucsSeparator::new(args.model.clone());
    if !separator.is_available() {
        warn!("demucs not found in PATH - jobs will fail until it is installed");
    }
    let transcoder = FfmpegTranscoder::new();
    if !transcoder.is_available() {
        warn!("ffmpeg not found in PATH - stems will be published as wav only");
    }

    let device = resolve_device();
    let policy = RetryPolicy {
        max_attempts: args.max_attempts.max(1),
        backoff: Duration::from_secs(args.retry_backoff_secs),
    };
    info!(
        workers = args.workers,
        model = %args.model,
        max_attempts = policy.max_attempts,
        "Worker pool configured"
    );

    let executor = Arc::new(WorkerExecutor::new(
        store,
        media,
        Arc::new(separator),
        Arc::new(transcoder),
        device,
        policy,
        Duration::from_millis(args.poll_interval_ms),
    ));

    let shutdown = CancellationToken::new();
    let mut handles = Vec::with_capacity(args.workers.max(1));
    for _ in 0..args.workers.max(1) {
        let executor = executor.clone();
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { executor.run(token).await }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install ctrl-c handler")?;
    info!("Shutdown requested - waiting for workers to finish current jobs");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }
    info!("All workers stopped");

    Ok(())
}
