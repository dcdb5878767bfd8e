use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::job::{AdmissionPolicy, JobLedger};
use crate::sandbox::{DockerSandbox, Sandbox};
use crate::scheduler::Scheduler;

/// Composes the ledger, scheduler, sandbox, and API server into one
/// runnable agent.
pub struct Agent {
    config: AgentConfig,
    ledger: Arc<RwLock<JobLedger>>,
    sandbox: Arc<dyn Sandbox>,
    started_at: Instant,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let sandbox: Arc<dyn Sandbox> = Arc::new(DockerSandbox::new(&config.sandbox));
        Self::with_sandbox(config, sandbox)
    }

    /// Build the agent around a different execution backend. Tests use this
    /// to drive the full pipeline without a container runtime.
    pub fn with_sandbox(config: AgentConfig, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            config,
            ledger: Arc::new(RwLock::new(JobLedger::new())),
            sandbox,
            started_at: Instant::now(),
        }
    }

    pub fn ledger(&self) -> Arc<RwLock<JobLedger>> {
        Arc::clone(&self.ledger)
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            ledger: Arc::clone(&self.ledger),
            policy: Arc::new(AdmissionPolicy::new(self.config.allowed_images.clone())),
            identity: Arc::new(self.config.identity.clone()),
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            started_at: self.started_at,
        }
    }

    /// Run the scheduler loop and the API server until the shutdown token
    /// fires. The scheduler runs as a spawned task; serving the API blocks.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let scheduler = Scheduler::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.sandbox),
            self.config.max_concurrent_jobs,
            Duration::from_millis(self.config.tick_interval_ms),
        );
        let scheduler_shutdown = shutdown.clone();
        tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        });

        let state = self.api_state();
        api::serve(self.config.listen_addr, state, shutdown).await
    }
}
