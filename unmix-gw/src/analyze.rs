//! Key/tempo analysis collaborator
//!
//! Optional utility behind `POST /analyze`: global key, scale and tempo
//! for an acquired track. Uses the essentia_streaming_extractor_music
//! command-line tool; the full extractor output holds hundreds of
//! features, only the tonal/rhythm subset is read back.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Analysis collaborator errors
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// Analyzer binary not found in PATH
    #[error("Analyzer binary not found in PATH")]
    BinaryNotFound,

    /// Failed to execute the analyzer
    #[error("Failed to execute analyzer: {0}")]
    ExecutionError(String),

    /// Analyzer exited non-zero
    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    /// Failed to parse analyzer JSON output
    #[error("Failed to parse analyzer output: {0}")]
    ParseError(String),

    /// I/O error (file read/write)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Key/tempo summary returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAnalysis {
    /// Musical key (e.g., "C", "A")
    pub key: Option<String>,
    /// Scale (e.g., "major", "minor")
    pub scale: Option<String>,
    /// Beats per minute
    pub bpm: Option<f64>,
}

/// Analysis contract. Blocking; callers run it under `spawn_blocking`.
pub trait TrackAnalyzer: Send + Sync {
    fn analyze(&self, audio_path: &Path) -> Result<TrackAnalysis, AnalyzeError>;

    /// Name of this analyzer (for logging)
    fn name(&self) -> &'static str;
}

/// Subset of the extractor output we read back
#[derive(Debug, Deserialize)]
struct ExtractorOutput {
    rhythm: Option<ExtractorRhythm>,
    tonal: Option<ExtractorTonal>,
}

#[derive(Debug, Deserialize)]
struct ExtractorRhythm {
    bpm: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExtractorTonal {
    key_key: Option<String>,
    key_scale: Option<String>,
}

/// essentia_streaming_extractor_music command-line analyzer
pub struct EssentiaAnalyzer {
    binary_path: String,
}

impl EssentiaAnalyzer {
    pub fn new() -> Self {
        Self {
            binary_path: "essentia_streaming_extractor_music".to_string(),
        }
    }

    /// Check whether the analyzer binary is runnable
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .is_ok()
    }
}

impl Default for EssentiaAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackAnalyzer for EssentiaAnalyzer {
    fn analyze(&self, audio_path: &Path) -> Result<TrackAnalysis, AnalyzeError> {
        let temp_output =
            std::env::temp_dir().join(format!("unmix_analysis_{}.json", uuid::Uuid::new_v4()));

        tracing::debug!(
            audio_file = %audio_path.display(),
            output_file = %temp_output.display(),
            "Running key/tempo analysis"
        );

        // Usage: essentia_streaming_extractor_music input.mp3 output.json
        let output = Command::new(&self.binary_path)
            .arg(audio_path)
            .arg(&temp_output)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AnalyzeError::BinaryNotFound
                } else {
                    AnalyzeError::ExecutionError(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = std::fs::remove_file(&temp_output);
            return Err(AnalyzeError::AnalysisFailed(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let json_content = std::fs::read_to_string(&temp_output)?;
        let _ = std::fs::remove_file(&temp_output);

        let parsed: ExtractorOutput = serde_json::from_str(&json_content)
            .map_err(|e| AnalyzeError::ParseError(e.to_string()))?;

        Ok(TrackAnalysis {
            key: parsed.tonal.as_ref().and_then(|t| t.key_key.clone()),
            scale: parsed.tonal.as_ref().and_then(|t| t.key_scale.clone()),
            bpm: parsed.rhythm.as_ref().and_then(|r| r.bpm),
        })
    }

    fn name(&self) -> &'static str {
        "essentia"
    }
}
