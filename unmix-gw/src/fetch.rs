//! Source acquisition collaborator
//!
//! Turns a source reference (YouTube URL or similar) into a local mp3 in
//! the staging directory. The real implementation shells out to yt-dlp;
//! the trait seam exists so tests can inject a stub. Acquisition runs
//! synchronously on the submission path: if it fails, the client hears
//! about it immediately and no job state is created.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Acquisition collaborator errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Downloader binary not found in PATH
    #[error("Downloader binary not found in PATH")]
    BinaryNotFound,

    /// Failed to execute the downloader
    #[error("Failed to execute downloader: {0}")]
    ExecutionError(String),

    /// Downloader exited non-zero
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Downloader reported no output file path
    #[error("Downloader produced no output path for: {0}")]
    NoOutput(String),

    /// Reported output file is missing on disk
    #[error("Acquired file missing on disk: {0}")]
    MissingFile(PathBuf),
}

/// Acquisition contract: produce a local audio file for a source
/// reference, or fail.
///
/// Implementations block for the duration of the download; callers run
/// them under `spawn_blocking`.
pub trait SourceFetcher: Send + Sync {
    /// Fetch `source` into `staged_dir`, returning the path of the
    /// acquired mp3.
    fn fetch(&self, source: &str, staged_dir: &Path) -> Result<PathBuf, FetchError>;

    /// Name of this fetcher (for logging)
    fn name(&self) -> &'static str;
}

/// yt-dlp command-line fetcher
///
/// Downloads the best available audio and converts to mp3, naming the
/// file after the video id so the SongIdentity is stable:
/// `staged/{video_id}.mp3`.
pub struct YtDlpFetcher {
    binary_path: String,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
        }
    }

    /// Check whether the downloader binary is runnable
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .is_ok()
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceFetcher for YtDlpFetcher {
    fn fetch(&self, source: &str, staged_dir: &Path) -> Result<PathBuf, FetchError> {
        let template = staged_dir.join("%(id)s.%(ext)s");

        tracing::debug!(source = %source, "Running yt-dlp acquisition");

        // --print after_move:filepath emits the final path on stdout;
        // --no-simulate keeps the download active alongside --print.
        let output = Command::new(&self.binary_path)
            .arg("--format")
            .arg("bestaudio/best")
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--audio-quality")
            .arg("192K")
            .arg("--no-playlist")
            .arg("--no-simulate")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--output")
            .arg(&template)
            .arg(source)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    FetchError::BinaryNotFound
                } else {
                    FetchError::ExecutionError(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::DownloadFailed(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| FetchError::NoOutput(source.to_string()))?;

        if !path.exists() {
            return Err(FetchError::MissingFile(path));
        }

        tracing::info!(source = %source, file = %path.display(), "Source acquired");
        Ok(path)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}
