use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single wire protocol version this agent accepts.
pub const SUPPORTED_PROTOCOL_VERSION: i64 = 1;

/// Default wall-clock ceiling for a job that does not set one.
pub const DEFAULT_MAX_RUNTIME_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobState {
    /// `finished` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Finished => write!(f, "finished"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Image,
    Build,
}

/// Resource ceilings for one sandboxed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
}

/// The `runtime` envelope of a job specification. This is the only part of
/// the submitted body the core interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    pub mode: RuntimeMode,
    pub image: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: Limits,
}

/// An accepted job specification. Immutable once admitted; the `task`
/// payload is opaque to the agent and is handed to the sandboxed process
/// verbatim on its standard input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub protocol_version: i64,
    pub job_id: String,
    #[serde(default)]
    pub task: serde_json::Value,
    pub runtime: RuntimeSpec,
}

impl JobSpec {
    pub fn max_runtime_secs(&self) -> u64 {
        self.runtime
            .limits
            .max_runtime_secs
            .unwrap_or(DEFAULT_MAX_RUNTIME_SECS)
    }
}

/// Structured error recorded on a job that reached `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(limit_secs: u64) -> Self {
        Self::new(
            "TIMEOUT",
            format!("job exceeded max runtime of {limit_secs}s and was killed"),
        )
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::new("SANDBOX_ERROR", message)
    }

    pub fn non_zero_exit(exit_code: Option<i32>) -> Self {
        let message = match exit_code {
            Some(code) => format!("process exited with code {code}"),
            None => "process terminated by signal".to_string(),
        };
        Self::new("NON_ZERO_EXIT", message)
    }

    pub fn cancelled() -> Self {
        Self::new("CANCELLED", "job cancelled before dispatch")
    }
}

/// One job's lifecycle record. Owned by the ledger; everything handed out of
/// the ledger is a cloned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<JobError>,
    pub spec: JobSpec,
}

impl JobRecord {
    /// Fresh `queued` record for an admitted specification.
    pub fn new(spec: JobSpec) -> Self {
        Self {
            job_id: spec.job_id.clone(),
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            spec,
        }
    }
}
