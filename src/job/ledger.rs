use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::record::{JobError, JobRecord, JobSpec, JobState};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("job identifier already exists: {0}")]
pub struct DuplicateIdentifier(pub String);

/// Partial field set merged into a record by [`JobLedger::update`].
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<JobError>,
}

/// Outcome of a cancellation request against the ledger.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job was still queued and is now `failed`/`CANCELLED`.
    Cancelled(JobRecord),
    /// The job had already left `queued`; the record is untouched.
    Unchanged(JobRecord),
    NotFound,
}

/// Authoritative in-memory store of job records.
///
/// Identifiers are never reused and records are never deleted, so the
/// insertion-order index stays exact for the lifetime of the process and
/// [`JobLedger::list_by_state`] yields FIFO order among equal-state records.
#[derive(Debug, Default)]
pub struct JobLedger {
    records: HashMap<String, JobRecord>,
    order: Vec<String>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `queued` record for an accepted specification.
    pub fn create(&mut self, spec: JobSpec) -> Result<JobRecord, DuplicateIdentifier> {
        if self.records.contains_key(&spec.job_id) {
            return Err(DuplicateIdentifier(spec.job_id));
        }
        let record = JobRecord::new(spec);
        self.order.push(record.job_id.clone());
        self.records.insert(record.job_id.clone(), record.clone());
        Ok(record)
    }

    /// Snapshot of a single record.
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.records.get(job_id).cloned()
    }

    /// Merge partial fields into an existing record. `None` means the record
    /// is absent, which callers treat as a lost race, not an error.
    pub fn update(&mut self, job_id: &str, update: JobUpdate) -> Option<JobRecord> {
        let record = self.records.get_mut(job_id)?;
        if let Some(state) = update.state {
            record.state = state;
        }
        if let Some(at) = update.started_at {
            record.started_at = Some(at);
        }
        if let Some(at) = update.finished_at {
            record.finished_at = Some(at);
        }
        if let Some(code) = update.exit_code {
            record.exit_code = Some(code);
        }
        if let Some(stdout) = update.stdout {
            record.stdout = stdout;
        }
        if let Some(stderr) = update.stderr {
            record.stderr = stderr;
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        Some(record.clone())
    }

    /// All records in the given state, in admission order.
    pub fn list_by_state(&self, state: JobState) -> Vec<JobRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| r.state == state)
            .cloned()
            .collect()
    }

    /// Every record, in admission order.
    pub fn all(&self) -> Vec<JobRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.state == JobState::Running)
            .count()
    }

    pub fn queued_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.state == JobState::Queued)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Transition `queued → running` with a start timestamp. Returns `None`
    /// if the record is absent or no longer queued, in which case the caller
    /// abandons the dispatch. Both this and [`JobLedger::cancel`] require
    /// the record to still be queued, so under an exclusive borrow exactly
    /// one of dispatch and cancellation can win a given record.
    pub fn begin(&mut self, job_id: &str) -> Option<JobRecord> {
        let record = self.records.get_mut(job_id)?;
        if record.state != JobState::Queued {
            return None;
        }
        record.state = JobState::Running;
        record.started_at = Some(Utc::now());
        Some(record.clone())
    }

    /// Cancel a queued job; a job that already left `queued` is reported
    /// back unchanged (running work is never killed in this version).
    pub fn cancel(&mut self, job_id: &str) -> CancelOutcome {
        let Some(record) = self.records.get_mut(job_id) else {
            return CancelOutcome::NotFound;
        };
        if record.state != JobState::Queued {
            return CancelOutcome::Unchanged(record.clone());
        }
        record.state = JobState::Failed;
        record.finished_at = Some(Utc::now());
        record.error = Some(JobError::cancelled());
        CancelOutcome::Cancelled(record.clone())
    }
}
