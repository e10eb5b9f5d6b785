//! Transcode collaborator
//!
//! Converts a lossless stem into the compressed distribution format via
//! an external ffmpeg invocation. Transcode failure is never a job
//! failure: the executor logs it and publishes the wav instead.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// Transcode collaborator errors
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Encoder binary not found in PATH
    #[error("Encoder binary not found in PATH")]
    BinaryNotFound,

    /// Failed to execute the encoder
    #[error("Failed to execute encoder: {0}")]
    ExecutionError(String),

    /// Encoder exited non-zero
    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    /// Encoder exited zero but wrote no output file
    #[error("Encoder produced no output file: {0}")]
    MissingOutput(String),
}

/// Transcode contract. Blocking; callers use `spawn_blocking`.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;

    /// Name of this transcoder (for logging)
    fn name(&self) -> &'static str;
}

/// ffmpeg command-line transcoder (libmp3lame, VBR quality 2)
pub struct FfmpegTranscoder {
    binary_path: String,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
        }
    }

    /// Check whether the encoder binary is runnable
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("-version")
            .output()
            .is_ok()
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            "Transcoding stem"
        );

        let result = Command::new(&self.binary_path)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-codec:a")
            .arg("libmp3lame")
            .arg("-qscale:a")
            .arg("2")
            .arg(output)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::BinaryNotFound
                } else {
                    TranscodeError::ExecutionError(e.to_string())
                }
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(TranscodeError::TranscodeFailed(format!(
                "Exit code: {:?}, stderr: {}",
                result.status.code(),
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(TranscodeError::MissingOutput(
                output.display().to_string(),
            ));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
