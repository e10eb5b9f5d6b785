//! Separation collaborator
//!
//! Drives the Demucs command-line separator: the one CPU/GPU-heavy,
//! long-running step of a job. The trait seam exists so executor tests
//! can inject a stub instead of the real model.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use unmix_common::jobs::STEM_VOCABULARY;

use crate::device::ComputeDevice;

/// Separation collaborator errors
#[derive(Debug, Error)]
pub enum SeparateError {
    /// Separator binary not found in PATH
    #[error("Separator binary not found in PATH")]
    BinaryNotFound,

    /// Failed to execute the separator
    #[error("Failed to execute separator: {0}")]
    ExecutionError(String),

    /// Separator exited non-zero
    #[error("Separation failed: {0}")]
    SeparationFailed(String),

    /// Separator finished but an expected stem file is absent
    #[error("Separator produced no '{0}' stem")]
    MissingStem(String),
}

/// One stem file the separator wrote
#[derive(Debug, Clone)]
pub struct StemFile {
    pub stem: String,
    pub path: PathBuf,
}

/// Separation contract: split `input` into stem files under `work_dir`.
///
/// Blocking for the full model run; callers use `spawn_blocking`.
pub trait Separator: Send + Sync {
    fn separate(
        &self,
        input: &Path,
        work_dir: &Path,
        device: ComputeDevice,
    ) -> Result<Vec<StemFile>, SeparateError>;

    /// Name of this separator (for logging)
    fn name(&self) -> &'static str;
}

/// Demucs command-line separator
///
/// `demucs -n {model} -d {device} -o {work_dir} {input}` writes
/// `{work_dir}/{model}/{track}/{stem}.wav` for each stem in the fixed
/// vocabulary, where `{track}` is the input base name.
pub struct DemucsSeparator {
    binary_path: String,
    model: String,
}

impl DemucsSeparator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            binary_path: "demucs".to_string(),
            model: model.into(),
        }
    }

    /// Check whether the separator binary is runnable
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("--help")
            .output()
            .is_ok()
    }
}

impl Default for DemucsSeparator {
    fn default() -> Self {
        Self::new("htdemucs")
    }
}

impl Separator for DemucsSeparator {
    fn separate(
        &self,
        input: &Path,
        work_dir: &Path,
        device: ComputeDevice,
    ) -> Result<Vec<StemFile>, SeparateError> {
        tracing::info!(
            input = %input.display(),
            model = %self.model,
            device = %device,
            "Running separation"
        );

        let output = Command::new(&self.binary_path)
            .arg("-n")
            .arg(&self.model)
            .arg("-d")
            .arg(device.as_str())
            .arg("-o")
            .arg(work_dir)
            .arg(input)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SeparateError::BinaryNotFound
                } else {
                    SeparateError::ExecutionError(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SeparateError::SeparationFailed(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let track = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SeparateError::ExecutionError(format!(
                "Input has no base name: {}",
                input.display()
            )))?;
        let track_dir = work_dir.join(&self.model).join(track);

        let mut stems = Vec::with_capacity(STEM_VOCABULARY.len());
        for stem in STEM_VOCABULARY {
            let path = track_dir.join(format!("{}.wav", stem));
            if !path.exists() {
                return Err(SeparateError::MissingStem(stem.to_string()));
            }
            stems.push(StemFile {
                stem: stem.to_string(),
                path,
            });
        }

        tracing::info!(input = %input.display(), "Separation finished");
        Ok(stems)
    }

    fn name(&self) -> &'static str {
        "demucs"
    }
}
