use std::collections::BTreeMap;
use std::net::SocketAddr;

use uuid::Uuid;

/// Configuration for Docker-based job execution.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container runtime executable. Anything argv-compatible with
    /// `docker run` works (e.g. podman).
    pub docker_bin: String,
    /// Disable network access inside job containers.
    pub network_disabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            network_disabled: false,
        }
    }
}

/// Static description of this node, reported by the status interface and
/// otherwise inert. Host provisioning decides the values; the agent only
/// carries them.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Minted at startup; changes on every restart.
    pub node_id: Uuid,
    pub node_name: String,
    pub cpus: usize,
    pub memory_mb: Option<u64>,
    pub labels: BTreeMap<String, String>,
}

impl NodeIdentity {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            node_name: node_name.into(),
            cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
            memory_mb: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self::new("jobd")
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    /// Concurrency ceiling enforced by the scheduler.
    pub max_concurrent_jobs: usize,
    /// Scheduler tick period.
    pub tick_interval_ms: u64,
    /// Image allow-list; empty means any image is admissible.
    pub allowed_images: Vec<String>,
    pub sandbox: SandboxConfig,
    pub identity: NodeIdentity,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:7700"
                .parse()
                .expect("default listen address is valid"),
            max_concurrent_jobs: 4,
            tick_interval_ms: 250,
            allowed_images: Vec::new(),
            sandbox: SandboxConfig::default(),
            identity: NodeIdentity::default(),
        }
    }
}

impl AgentConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_allowed_image(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_images.push(pattern.into());
        self
    }
}
