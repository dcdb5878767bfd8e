//! Sandboxed execution of a single job.
//!
//! The scheduler talks to the backend through the [`Sandbox`] trait so tests
//! can substitute a programmable fake for the real container runtime.

pub mod docker;
pub mod process;

pub use docker::DockerSandbox;
pub use process::run_process;

use crate::job::JobSpec;

/// Execution-time failure distinct from a normal non-zero exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The process outlived its wall-clock ceiling and was killed.
    Timeout,
    /// The sandbox failed at the harness level: launch failure, I/O
    /// breakage, or a missing image reference.
    Sandbox(String),
}

/// What one sandbox invocation produced. Exactly one of normal exit,
/// timeout, or sandbox fault resolves an invocation; output captured before
/// a kill is preserved.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub fault: Option<Fault>,
}

impl ExecutionResult {
    pub fn fault(fault: Fault) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            fault: Some(fault),
        }
    }

    pub fn exited(exit_code: Option<i32>, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            fault: None,
        }
    }
}

/// Runs one job to completion. The backend makes no success/failure
/// judgement beyond fault detection; interpreting the exit code is the
/// scheduler's job.
#[async_trait::async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, spec: &JobSpec) -> ExecutionResult;
}
