//! Worker executor
//!
//! Pulls claimed jobs through the full pipeline: separate, persist
//! lossless, transcode with fallback, publish the result. Every claimed
//! job produces a terminal JobResult (or a RETRY within the configured
//! policy); no fault escapes the claim loop, so the worker process
//! survives bad jobs and keeps pulling.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use unmix_common::jobs::{check_stem_vocabulary, Job, StemMap};
use unmix_common::media::{artifact_url, AudioFormat, MediaTree};
use unmix_common::store::JobStore;

use crate::device::ComputeDevice;
use crate::separate::{SeparateError, Separator};
use crate::transcode::Transcoder;

/// Bounded retry policy for failed attempts
///
/// `max_attempts` counts claims, not re-claims: the default of 1 means a
/// failed attempt goes straight to FAILURE and is never requeued.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_secs(30),
        }
    }
}

/// Execution errors inside one job attempt
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Separate(#[from] SeparateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] unmix_common::Error),

    #[error("Worker task panicked: {0}")]
    Join(String),
}

impl ExecError {
    /// Invariant violations are flagged and never retried.
    fn is_defect(&self) -> bool {
        matches!(self, ExecError::Common(unmix_common::Error::Defect(_)))
    }
}

/// One worker: a claim loop plus the per-job pipeline
pub struct WorkerExecutor {
    store: JobStore,
    media: Arc<MediaTree>,
    separator: Arc<dyn Separator>,
    transcoder: Arc<dyn Transcoder>,
    device: ComputeDevice,
    policy: RetryPolicy,
    poll_interval: Duration,
}

impl WorkerExecutor {
    pub fn new(
        store: JobStore,
        media: Arc<MediaTree>,
        separator: Arc<dyn Separator>,
        transcoder: Arc<dyn Transcoder>,
        device: ComputeDevice,
        policy: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            media,
            separator,
            transcoder,
            device,
            policy,
            poll_interval,
        }
    }

    /// Claim loop: one job to completion at a time until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(device = %self.device, "Worker loop started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.store.claim_next().await {
                Ok(Some(job)) => self.run_job(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim next job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!("Worker loop stopped");
    }

    /// Execute one claimed job and record its outcome.
    pub async fn run_job(&self, job: Job) {
        let job_id = job.job_id;
        tracing::info!(
            job_id = %job_id,
            song_id = %job.song_id,
            attempt = job.attempts,
            "Processing job"
        );

        match self.execute(&job).await {
            Ok(stems) => {
                let payload = match serde_json::to_value(&stems) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to encode result");
                        return;
                    }
                };
                match self.store.mark_success(job_id, payload).await {
                    Ok(()) => {
                        tracing::info!(job_id = %job_id, stems = stems.len(), "Job succeeded");
                    }
                    Err(unmix_common::Error::Defect(msg)) => {
                        tracing::error!(job_id = %job_id, error = %msg, "Result refused as defect");
                        if let Err(e) = self.store.mark_failure(job_id, &format!("Defect: {}", msg)).await {
                            tracing::error!(job_id = %job_id, error = %e, "Failed to record defect");
                        }
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to record success");
                    }
                }
            }
            Err(error) => self.handle_failure(&job, error).await,
        }
    }

    /// Convert an attempt fault into RETRY (within policy) or FAILURE.
    async fn handle_failure(&self, job: &Job, error: ExecError) {
        let message = error.to_string();

        if error.is_defect() {
            tracing::error!(job_id = %job.job_id, error = %message, "Invariant violation");
            if let Err(e) = self.store.mark_failure(job.job_id, &message).await {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to record failure");
            }
            return;
        }

        if job.attempts < self.policy.max_attempts {
            let next_attempt_at = Utc::now()
                + chrono::Duration::from_std(self.policy.backoff)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
            tracing::warn!(
                job_id = %job.job_id,
                attempt = job.attempts,
                max_attempts = self.policy.max_attempts,
                error = %message,
                "Attempt failed - requeueing"
            );
            if let Err(e) = self
                .store
                .mark_retry(job.job_id, &message, next_attempt_at)
                .await
            {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to record retry");
            }
        } else {
            tracing::error!(job_id = %job.job_id, error = %message, "Job failed");
            if let Err(e) = self.store.mark_failure(job.job_id, &message).await {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to record failure");
            }
        }
    }

    /// Run the pipeline in per-job scratch space, cleaning it up on both
    /// outcomes.
    async fn execute(&self, job: &Job) -> Result<StemMap, ExecError> {
        let input = PathBuf::from(&job.input_path);
        if !input.exists() {
            return Err(unmix_common::Error::NotFound(format!(
                "Acquired file missing: {}",
                job.input_path
            ))
            .into());
        }

        let work_dir = std::env::temp_dir().join(format!("unmix-sep-{}", job.job_id));
        tokio::fs::create_dir_all(&work_dir).await?;

        let result = self.separate_and_publish(job, &input, &work_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %work_dir.display(), error = %e, "Failed to remove scratch dir");
            }
        }

        result
    }

    async fn separate_and_publish(
        &self,
        job: &Job,
        input: &Path,
        work_dir: &Path,
    ) -> Result<StemMap, ExecError> {
        // The model run is the long, blocking step
        let separator = self.separator.clone();
        let sep_input = input.to_path_buf();
        let sep_work = work_dir.to_path_buf();
        let device = self.device;
        let stem_files =
            tokio::task::spawn_blocking(move || separator.separate(&sep_input, &sep_work, device))
                .await
                .map_err(|e| ExecError::Join(e.to_string()))??;

        let song_dir = self.media.song_dir(&job.song_id)?;
        tokio::fs::create_dir_all(&song_dir).await?;

        let mut stems = StemMap::new();
        for stem_file in stem_files {
            // Lossless first; the wav is the fallback artifact
            let wav_path =
                self.media
                    .artifact_path(&job.song_id, &stem_file.stem, AudioFormat::Wav)?;
            tokio::fs::copy(&stem_file.path, &wav_path).await?;

            let mp3_path =
                self.media
                    .artifact_path(&job.song_id, &stem_file.stem, AudioFormat::Mp3)?;
            let transcoder = self.transcoder.clone();
            let encode_in = wav_path.clone();
            let encode_out = mp3_path.clone();
            let transcoded =
                tokio::task::spawn_blocking(move || transcoder.transcode(&encode_in, &encode_out))
                    .await
                    .map_err(|e| ExecError::Join(e.to_string()))?;

            let url = match transcoded {
                Ok(()) => artifact_url(&job.song_id, &stem_file.stem, AudioFormat::Mp3),
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.job_id,
                        stem = %stem_file.stem,
                        error = %e,
                        "Transcode failed - publishing lossless artifact"
                    );
                    artifact_url(&job.song_id, &stem_file.stem, AudioFormat::Wav)
                }
            };
            stems.insert(stem_file.stem, url);
        }

        if stems.is_empty() {
            return Err(
                unmix_common::Error::Defect("Separation produced zero stems".to_string()).into(),
            );
        }
        check_stem_vocabulary(&stems)?;

        Ok(stems)
    }
}
