use std::time::Duration;

use crate::config::SandboxConfig;
use crate::job::{JobSpec, RuntimeSpec};
use crate::sandbox::{run_process, ExecutionResult, Fault, Sandbox};

/// Executes jobs in ephemeral Docker containers.
///
/// Each run gets a fresh `--rm` container with interactive standard
/// streams; the full job specification is serialized to the container's
/// stdin and the image's entry point is trusted to consume it. No shell is
/// involved unless the job supplies an explicit command override.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    bin: String,
    network_disabled: bool,
}

impl DockerSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            bin: config.docker_bin.clone(),
            network_disabled: config.network_disabled,
        }
    }

    /// Argument vector for one sandbox invocation. Pure, so the shape is
    /// unit-testable without a container runtime on the host.
    pub fn invocation_args(&self, runtime: &RuntimeSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];

        if self.network_disabled {
            args.push("--network=none".to_string());
        }

        if let Some(mb) = runtime.limits.memory_mb {
            args.push(format!("--memory={mb}m"));
        }

        // BTreeMap iteration keeps the flag order stable across runs.
        for (key, value) in &runtime.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(runtime.image.clone());

        if let Some(command) = &runtime.command {
            args.extend(command.iter().cloned());
        }

        args
    }
}

#[async_trait::async_trait]
impl Sandbox for DockerSandbox {
    async fn run(&self, spec: &JobSpec) -> ExecutionResult {
        if spec.runtime.image.trim().is_empty() {
            return ExecutionResult::fault(Fault::Sandbox(
                "job runtime has no image reference".to_string(),
            ));
        }

        let payload = match serde_json::to_vec(spec) {
            Ok(payload) => payload,
            Err(e) => {
                return ExecutionResult::fault(Fault::Sandbox(format!(
                    "failed to serialize job spec for sandbox stdin: {e}"
                )))
            }
        };

        let args = self.invocation_args(&spec.runtime);
        let timeout = Duration::from_secs(spec.max_runtime_secs());

        tracing::debug!(
            job_id = %spec.job_id,
            image = %spec.runtime.image,
            timeout_secs = timeout.as_secs(),
            "launching sandbox container"
        );

        run_process(&self.bin, &args, payload, timeout).await
    }
}
