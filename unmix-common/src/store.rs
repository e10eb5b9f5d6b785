//! SQLite-backed job store
//!
//! The store is both the task queue and the result store: the gateway
//! inserts PENDING rows, workers claim them with a single atomic UPDATE,
//! and the worker side writes results back into the same row. Both
//! services open the same database file under the shared root folder.
//!
//! Delivery contract: `claim_next` flips exactly one eligible row to
//! STARTED per call, so one enqueued job is delivered to exactly one
//! executing attempt at a time. No ordering is guaranteed across distinct
//! jobs beyond best-effort submission order. A worker that dies mid-job
//! leaves its row STARTED with no automatic recovery.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jobs::{check_stem_vocabulary, normalize_stem_payload, Job, JobState, StemMap};

/// Open (or create) the shared database and initialize the schema.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create the jobs table if absent and set connection pragmas.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    // Gateway and workers contend on the same file; wait out short locks
    // instead of surfacing SQLITE_BUSY.
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            source_ref TEXT NOT NULL,
            song_id TEXT NOT NULL,
            input_path TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'PENDING',
            attempts INTEGER NOT NULL DEFAULT 0,
            stems TEXT NOT NULL DEFAULT '{}',
            error TEXT,
            submitted_at TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT,
            next_attempt_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database schema initialized (jobs)");
    Ok(())
}

/// Handle on the shared jobs table
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Enqueue a job. The inserted row is the implicit PENDING result.
    pub async fn enqueue(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, source_ref, song_id, input_path, state, attempts,
                stems, submitted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.job_id.to_string())
        .bind(&job.source_ref)
        .bind(&job.song_id)
        .bind(&job.input_path)
        .bind(job.state.as_str())
        .bind(job.attempts as i64)
        .bind(serde_json::to_string(&job.stems).map_err(|e| {
            Error::Internal(format!("Failed to serialize stems: {}", e))
        })?)
        .bind(job.submitted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Claim the next eligible job for execution.
    ///
    /// Atomically flips the oldest PENDING row (or RETRY row whose backoff
    /// has elapsed) to STARTED and increments its attempt counter. Jobs
    /// whose song id is currently held by another STARTED job are skipped,
    /// so two jobs never write into the same per-song output directory at
    /// once. Returns `None` when nothing is claimable.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let now = Utc::now();

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'STARTED', attempts = attempts + 1, started_at = ?1
            WHERE job_id = (
                SELECT job_id FROM jobs
                WHERE (state = 'PENDING'
                       OR (state = 'RETRY' AND next_attempt_at <= ?1))
                  AND song_id NOT IN (
                      SELECT song_id FROM jobs WHERE state = 'STARTED'
                  )
                ORDER BY submitted_at ASC
                LIMIT 1
            )
            RETURNING job_id, source_ref, song_id, input_path, state,
                      attempts, stems, error, submitted_at, started_at,
                      ended_at, next_attempt_at
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Publish a SUCCESS result.
    ///
    /// Accepts the raw collaborator payload (flat map or legacy shape
    /// nested under `result`) and normalizes it before writing, so the
    /// store only ever holds the canonical flat form. An empty or
    /// off-vocabulary stem set is refused as a defect rather than recorded
    /// as a success.
    pub async fn mark_success(&self, job_id: Uuid, payload: serde_json::Value) -> Result<()> {
        let stems = normalize_stem_payload(payload)?;
        if stems.is_empty() {
            return Err(Error::Defect(
                "Refusing to record SUCCESS with zero stems".to_string(),
            ));
        }
        check_stem_vocabulary(&stems)?;

        let stems_json = serde_json::to_string(&stems)
            .map_err(|e| Error::Internal(format!("Failed to serialize stems: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'SUCCESS', stems = ?, error = NULL, ended_at = ?
            WHERE job_id = ? AND state NOT IN ('SUCCESS', 'FAILURE')
            "#,
        )
        .bind(stems_json)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(job_id = %job_id, "SUCCESS ignored: job already terminal");
        }
        Ok(())
    }

    /// Record a terminal FAILURE with a sanitized cause.
    pub async fn mark_failure(&self, job_id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'FAILURE', error = ?, ended_at = ?
            WHERE job_id = ? AND state NOT IN ('SUCCESS', 'FAILURE')
            "#,
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(job_id = %job_id, "FAILURE ignored: job already terminal");
        }
        Ok(())
    }

    /// Requeue a failed attempt under the bounded retry policy. The row
    /// becomes claimable again once `next_attempt_at` has passed.
    pub async fn mark_retry(
        &self,
        job_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'RETRY', error = ?, next_attempt_at = ?
            WHERE job_id = ? AND state NOT IN ('SUCCESS', 'FAILURE')
            "#,
        )
        .bind(error)
        .bind(next_attempt_at.to_rfc3339())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(job_id = %job_id, "RETRY ignored: job already terminal");
        }
        Ok(())
    }

    /// Load one job by id. `None` when no record exists (the status
    /// surface maps that to PENDING).
    pub async fn load(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, source_ref, song_id, input_path, state, attempts,
                   stems, error, submitted_at, started_at, ended_at,
                   next_attempt_at
            FROM jobs
            WHERE job_id = ?
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let state: String = row.get("state");
    let state: JobState = state.parse()?;

    let stems: String = row.get("stems");
    let stems: StemMap = serde_json::from_str(&stems)
        .map_err(|e| Error::Internal(format!("Failed to deserialize stems: {}", e)))?;

    Ok(Job {
        job_id,
        source_ref: row.get("source_ref"),
        song_id: row.get("song_id"),
        input_path: row.get("input_path"),
        state,
        attempts: row.get::<i64, _>("attempts") as u32,
        stems,
        error: row.get("error"),
        submitted_at: parse_timestamp(row.get("submitted_at"))?,
        started_at: parse_optional_timestamp(row.get("started_at"))?,
        ended_at: parse_optional_timestamp(row.get("ended_at"))?,
        next_attempt_at: parse_optional_timestamp(row.get("next_attempt_at"))?,
    })
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp: {}", e)))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}
