//! On-disk media tree: staging and artifact roots
//!
//! Layout under the shared root folder:
//!
//! ```text
//! {root}/staged/{song_id}.mp3            acquired originals
//! {root}/artifacts/{song_id}/{stem}.wav  lossless stems
//! {root}/artifacts/{song_id}/{stem}.mp3  transcoded stems
//! ```
//!
//! `MediaTree` is the explicit handle owning both roots. It is created at
//! process start (`ensure` makes the directories idempotently) and torn
//! down by a scoped `cleanup` call during shutdown. Nothing under the tree
//! survives a restart.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Artifact encodings the worker publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Lossless, always persisted first
    Wav,
    /// Compressed distribution format, produced by transcode when possible
    Mp3,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// Parse a file extension, case-sensitive (artifact names are
    /// produced by this crate and are always lowercase).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "wav" => Some(AudioFormat::Wav),
            "mp3" => Some(AudioFormat::Mp3),
            _ => None,
        }
    }
}

/// Owned pair of staging/artifact roots
#[derive(Debug, Clone)]
pub struct MediaTree {
    staged: PathBuf,
    artifacts: PathBuf,
}

impl MediaTree {
    /// Lay out the tree under `root`. No filesystem access; call
    /// [`ensure`](Self::ensure) to create the directories.
    pub fn new(root: &Path) -> Self {
        Self {
            staged: root.join("staged"),
            artifacts: root.join("artifacts"),
        }
    }

    /// Create both roots if absent. Idempotent.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.staged)?;
        std::fs::create_dir_all(&self.artifacts)?;
        Ok(())
    }

    /// Remove both roots recursively. Tolerates either tree already being
    /// absent, so a second invocation is a no-op.
    pub fn cleanup(&self) -> Result<()> {
        for dir in [&self.staged, &self.artifacts] {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Staging directory holding acquired originals
    pub fn staged_dir(&self) -> &Path {
        &self.staged
    }

    /// Artifact root holding per-song output directories
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts
    }

    /// Path of an acquired original: `staged/{song_id}.mp3`
    pub fn source_path(&self, song_id: &str) -> Result<PathBuf> {
        validate_component(song_id)?;
        Ok(self.staged.join(format!("{}.mp3", song_id)))
    }

    /// Per-song output directory: `artifacts/{song_id}`
    pub fn song_dir(&self, song_id: &str) -> Result<PathBuf> {
        validate_component(song_id)?;
        Ok(self.artifacts.join(song_id))
    }

    /// Path of one stem artifact, fully determined by
    /// `(song_id, stem, format)`: `artifacts/{song_id}/{stem}.{ext}`
    pub fn artifact_path(
        &self,
        song_id: &str,
        stem: &str,
        format: AudioFormat,
    ) -> Result<PathBuf> {
        validate_component(song_id)?;
        validate_component(stem)?;
        Ok(self
            .artifacts
            .join(song_id)
            .join(format!("{}.{}", stem, format.extension())))
    }
}

/// URL path of a stem artifact as published in job results
pub fn artifact_url(song_id: &str, stem: &str, format: AudioFormat) -> String {
    format!("/artifacts/{}/{}.{}", song_id, stem, format.extension())
}

/// URL path of the original full mix for a song
pub fn source_url(song_id: &str) -> String {
    format!("/source/{}.mp3", song_id)
}

/// Derive the SongIdentity from an acquired file's path: the base name
/// with the extension stripped.
pub fn song_id_from_path(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::Defect(format!(
                "Cannot derive song identity from path: {}",
                path.display()
            ))
        })?;
    Ok(stem.to_string())
}

/// Recover the SongIdentity from a published stem URL: the parent
/// directory component of the artifact path. Fallback for results that do
/// not carry an explicit song id.
pub fn song_id_from_stem_url(url: &str) -> Result<String> {
    Path::new(url)
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Defect(format!(
                "Cannot derive song identity from stem path: {}",
                url
            ))
        })
}

/// Reject path components that could escape the managed roots.
///
/// Song ids and stem names must be single, plain path segments: non-empty,
/// no separators, no parent references, no leading dot.
pub fn validate_component(component: &str) -> Result<()> {
    if component.is_empty() {
        return Err(Error::InvalidInput("Empty path component".to_string()));
    }
    if component.contains('/') || component.contains('\\') || component.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "Path component contains a separator: {}",
            component
        )));
    }
    if component == "." || component == ".." || component.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "Path component is a dot reference: {}",
            component
        )));
    }
    Ok(())
}
