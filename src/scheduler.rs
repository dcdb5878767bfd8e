use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::job::{JobError, JobLedger, JobRecord, JobState, JobUpdate};
use crate::sandbox::{ExecutionResult, Fault, Sandbox};

/// The dispatch control loop.
///
/// Each tick takes as many queued jobs as the concurrency ceiling allows, in
/// admission order, and hands each to the sandbox on its own task. The tick
/// itself never waits for a job to finish, and a slow tick is skipped rather
/// than run concurrently with itself.
pub struct Scheduler {
    ledger: Arc<RwLock<JobLedger>>,
    sandbox: Arc<dyn Sandbox>,
    max_concurrent_jobs: usize,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        ledger: Arc<RwLock<JobLedger>>,
        sandbox: Arc<dyn Sandbox>,
        max_concurrent_jobs: usize,
        tick_interval: Duration,
    ) -> Self {
        Self {
            ledger,
            sandbox,
            max_concurrent_jobs,
            tick_interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            max_concurrent_jobs = self.max_concurrent_jobs,
            tick_ms = self.tick_interval.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        // Slot accounting and the queued→running transitions happen under
        // one write lock, so running_count can never overshoot the ceiling.
        let dispatched: Vec<JobRecord> = {
            let mut ledger = self.ledger.write().await;
            let available = self
                .max_concurrent_jobs
                .saturating_sub(ledger.running_count());
            if available == 0 {
                return;
            }

            let queued = ledger.list_by_state(JobState::Queued);
            queued
                .iter()
                .take(available)
                .filter_map(|record| {
                    let started = ledger.begin(&record.job_id);
                    if started.is_none() {
                        // Cancelled between selection and dispatch; its
                        // absence from the queued set is the outcome.
                        tracing::debug!(job_id = %record.job_id, "Dispatch abandoned, job left queued state");
                    }
                    started
                })
                .collect()
        };

        for record in dispatched {
            tracing::info!(
                job_id = %record.job_id,
                image = %record.spec.runtime.image,
                "Dispatching job"
            );
            let ledger = Arc::clone(&self.ledger);
            let sandbox = Arc::clone(&self.sandbox);
            tokio::spawn(run_one(ledger, sandbox, record));
        }
    }
}

/// Execute one dispatched job and write its terminal state back. Runs on
/// its own task; a fault here never reaches the scheduler loop.
async fn run_one(ledger: Arc<RwLock<JobLedger>>, sandbox: Arc<dyn Sandbox>, record: JobRecord) {
    let result = sandbox.run(&record.spec).await;
    let (state, error) = classify(&record, &result);

    tracing::info!(
        job_id = %record.job_id,
        state = %state,
        exit_code = ?result.exit_code,
        error_code = error.as_ref().map(|e| e.code.as_str()),
        "Job completed"
    );

    let update = JobUpdate {
        state: Some(state),
        finished_at: Some(Utc::now()),
        exit_code: result.exit_code,
        stdout: Some(result.stdout),
        stderr: Some(result.stderr),
        error,
        ..Default::default()
    };

    if ledger.write().await.update(&record.job_id, update).is_none() {
        tracing::warn!(
            job_id = %record.job_id,
            "Job record disappeared before result write-back, dropping result"
        );
    }
}

/// Map a sandbox result onto a terminal state. A fault wins over the exit
/// code; a clean zero exit is the only path to `finished`.
pub fn classify(record: &JobRecord, result: &ExecutionResult) -> (JobState, Option<JobError>) {
    match &result.fault {
        Some(Fault::Timeout) => (
            JobState::Failed,
            Some(JobError::timeout(record.spec.max_runtime_secs())),
        ),
        Some(Fault::Sandbox(message)) => (JobState::Failed, Some(JobError::sandbox(message))),
        None => match result.exit_code {
            Some(0) => (JobState::Finished, None),
            code => (JobState::Failed, Some(JobError::non_zero_exit(code))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::record::{Limits, RuntimeMode, RuntimeSpec, SUPPORTED_PROTOCOL_VERSION};
    use crate::job::JobSpec;
    use std::collections::BTreeMap;

    fn record() -> JobRecord {
        JobRecord::new(JobSpec {
            protocol_version: SUPPORTED_PROTOCOL_VERSION,
            job_id: "job-1".to_string(),
            task: serde_json::Value::Null,
            runtime: RuntimeSpec {
                mode: RuntimeMode::Image,
                image: "alpine:latest".to_string(),
                command: None,
                env: BTreeMap::new(),
                limits: Limits::default(),
            },
        })
    }

    #[test]
    fn zero_exit_finishes() {
        let result = ExecutionResult::exited(Some(0), "out".into(), String::new());
        let (state, error) = classify(&record(), &result);
        assert_eq!(state, JobState::Finished);
        assert!(error.is_none());
    }

    #[test]
    fn non_zero_exit_fails() {
        let result = ExecutionResult::exited(Some(3), String::new(), "boom".into());
        let (state, error) = classify(&record(), &result);
        assert_eq!(state, JobState::Failed);
        assert_eq!(error.unwrap().code, "NON_ZERO_EXIT");
    }

    #[test]
    fn signal_death_counts_as_failure() {
        let result = ExecutionResult::exited(None, String::new(), String::new());
        let (state, error) = classify(&record(), &result);
        assert_eq!(state, JobState::Failed);
        assert_eq!(error.unwrap().code, "NON_ZERO_EXIT");
    }

    #[test]
    fn timeout_fault_wins_over_exit_code() {
        let mut result = ExecutionResult::exited(Some(0), "partial".into(), String::new());
        result.fault = Some(Fault::Timeout);
        let (state, error) = classify(&record(), &result);
        assert_eq!(state, JobState::Failed);
        assert_eq!(error.unwrap().code, "TIMEOUT");
    }

    #[test]
    fn sandbox_fault_maps_to_sandbox_error() {
        let result = ExecutionResult::fault(Fault::Sandbox("no such image".to_string()));
        let (state, error) = classify(&record(), &result);
        assert_eq!(state, JobState::Failed);
        let error = error.unwrap();
        assert_eq!(error.code, "SANDBOX_ERROR");
        assert!(error.message.contains("no such image"));
    }
}
