//! Job data model and state machine
//!
//! One job is one end-to-end request: acquire a source, separate it into
//! stems, publish the artifacts. The job row doubles as the result record:
//! it is created at PENDING when the gateway enqueues, mutated only by the
//! worker side, and never overwritten once it reaches a terminal state.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Stem names the separation collaborator produces, in publication order.
///
/// Every SUCCESS result carries exactly this set. Anything else (a subset,
/// a superset, or nothing at all) is a defect, not a success.
pub const STEM_VOCABULARY: [&str; 4] = ["vocals", "drums", "bass", "other"];

/// Stem name → artifact URL path, ordered so that serialized results are
/// byte-identical across repeated reads of the same terminal job.
pub type StemMap = BTreeMap<String, String>;

/// Job lifecycle state
///
/// ```text
/// PENDING --(worker claims)--> STARTED --(requeue)--> RETRY --> STARTED
/// STARTED --(success)--> SUCCESS   [terminal]
/// STARTED --(fault)----> FAILURE   [terminal]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Enqueued, no worker has claimed it yet
    Pending,
    /// Claimed by exactly one worker attempt
    Started,
    /// Attempt failed, requeued under the bounded retry policy
    Retry,
    /// Stems published
    Success,
    /// Gave up; `error` holds the sanitized cause
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Started => "STARTED",
            JobState::Retry => "RETRY",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    /// SUCCESS and FAILURE are terminal: once set, never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "STARTED" => Ok(JobState::Started),
            "RETRY" => Ok(JobState::Retry),
            "SUCCESS" => Ok(JobState::Success),
            "FAILURE" => Ok(JobState::Failure),
            other => Err(Error::Internal(format!("Unknown job state: {}", other))),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the shared job store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier, handed back to the submitting client
    pub job_id: Uuid,

    /// Source reference as submitted (URL or opaque identifier)
    pub source_ref: String,

    /// Stable slug identifying the acquired track, derived once from the
    /// acquired file's base name before enqueue
    pub song_id: String,

    /// Local path of the acquired audio file the worker operates on
    pub input_path: String,

    /// Current lifecycle state
    pub state: JobState,

    /// Number of worker claims so far (incremented at claim time)
    pub attempts: u32,

    /// Stem name → artifact URL path; empty until SUCCESS
    pub stems: StemMap,

    /// Sanitized failure cause; only present on FAILURE
    pub error: Option<String>,

    /// Submission time
    pub submitted_at: DateTime<Utc>,

    /// First/latest claim time
    pub started_at: Option<DateTime<Utc>>,

    /// Time the job reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Earliest time a RETRY row becomes claimable again
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job at PENDING, ready to enqueue.
    pub fn new(source_ref: String, song_id: String, input_path: String) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            source_ref,
            song_id,
            input_path,
            state: JobState::Pending,
            attempts: 0,
            stems: StemMap::new(),
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            ended_at: None,
            next_attempt_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Normalize a raw result payload into the canonical flat stem map.
///
/// Workers and older tooling have produced two shapes: a flat
/// `{stem: url}` object, and the same object nested under a `result` key.
/// Normalization happens here, at the single write path into the store, so
/// readers never branch on shape.
pub fn normalize_stem_payload(payload: Value) -> Result<StemMap> {
    let object = match payload {
        Value::Object(mut object) => match object.remove("result") {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "Result payload 'result' key holds {}, expected an object",
                    json_type_name(&other)
                )))
            }
            None => object,
        },
        other => {
            return Err(Error::InvalidInput(format!(
                "Result payload is {}, expected an object",
                json_type_name(&other)
            )))
        }
    };

    let mut stems = StemMap::new();
    for (stem, value) in object {
        match value {
            Value::String(url) => {
                stems.insert(stem, url);
            }
            other => {
                return Err(Error::InvalidInput(format!(
                    "Stem '{}' maps to {}, expected a URL string",
                    stem,
                    json_type_name(&other)
                )))
            }
        }
    }

    Ok(stems)
}

/// Check a stem map against the fixed separation vocabulary.
///
/// Returns a defect error when keys are missing or unexpected ones appear.
pub fn check_stem_vocabulary(stems: &StemMap) -> Result<()> {
    for expected in STEM_VOCABULARY {
        if !stems.contains_key(expected) {
            return Err(Error::Defect(format!(
                "Separation result is missing stem '{}'",
                expected
            )));
        }
    }
    for stem in stems.keys() {
        if !STEM_VOCABULARY.contains(&stem.as_str()) {
            return Err(Error::Defect(format!(
                "Separation result contains unexpected stem '{}'",
                stem
            )));
        }
    }
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_round_trips_through_text() {
        for state in [
            JobState::Pending,
            JobState::Started,
            JobState::Retry,
            JobState::Success,
            JobState::Failure,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }

    #[test]
    fn state_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&JobState::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::from_str::<JobState>("\"RETRY\"").unwrap(),
            JobState::Retry
        );
    }

    #[test]
    fn only_success_and_failure_are_terminal() {
        assert!(JobState::Success.is_terminal());
        assert!(JobState::Failure.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Started.is_terminal());
        assert!(!JobState::Retry.is_terminal());
    }

    #[test]
    fn normalize_accepts_flat_payload() {
        let stems = normalize_stem_payload(json!({
            "vocals": "/artifacts/abc/vocals.mp3",
            "drums": "/artifacts/abc/drums.mp3",
        }))
        .unwrap();
        assert_eq!(stems["vocals"], "/artifacts/abc/vocals.mp3");
        assert_eq!(stems.len(), 2);
    }

    #[test]
    fn normalize_unwraps_nested_result_payload() {
        let stems = normalize_stem_payload(json!({
            "status": "SUCCESS",
            "result": { "bass": "/artifacts/abc/bass.wav" },
        }))
        .unwrap();
        assert_eq!(stems["bass"], "/artifacts/abc/bass.wav");
        assert_eq!(stems.len(), 1);
    }

    #[test]
    fn normalize_rejects_non_object_payloads() {
        assert!(normalize_stem_payload(json!("vocals")).is_err());
        assert!(normalize_stem_payload(json!({ "result": 7 })).is_err());
        assert!(normalize_stem_payload(json!({ "vocals": 1 })).is_err());
    }

    #[test]
    fn vocabulary_check_requires_exact_set() {
        let mut stems = StemMap::new();
        for stem in STEM_VOCABULARY {
            stems.insert(stem.to_string(), format!("/artifacts/abc/{}.mp3", stem));
        }
        assert!(check_stem_vocabulary(&stems).is_ok());

        stems.remove("bass");
        assert!(matches!(
            check_stem_vocabulary(&stems),
            Err(Error::Defect(_))
        ));

        stems.insert("bass".into(), "/artifacts/abc/bass.mp3".into());
        stems.insert("piano".into(), "/artifacts/abc/piano.mp3".into());
        assert!(matches!(
            check_stem_vocabulary(&stems),
            Err(Error::Defect(_))
        ));
    }
}
