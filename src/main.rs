use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobd::agent::Agent;
use jobd::config::{AgentConfig, NodeIdentity, SandboxConfig};
use jobd::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobd")]
#[command(version)]
#[command(about = "Single-node container job execution agent")]
struct Args {
    /// Address to listen on for the HTTP API
    #[arg(long, default_value = "127.0.0.1:7700")]
    listen: SocketAddr,

    /// Maximum number of concurrently running jobs
    #[arg(long, default_value_t = 4)]
    max_jobs: usize,

    /// Scheduler tick interval in milliseconds
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,

    /// Allowed image pattern (repeatable): an exact reference, or "name:*"
    /// for any tag under "name:". No patterns means any image is allowed.
    #[arg(long = "allow-image")]
    allow_image: Vec<String>,

    /// Container runtime executable
    #[arg(long, default_value = "docker")]
    docker_bin: String,

    /// Disable network access inside job containers
    #[arg(long)]
    no_network: bool,

    /// Node name reported by the status API (defaults to $HOSTNAME)
    #[arg(long)]
    node_name: Option<String>,

    /// Memory capacity reported by the status API, in MiB
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Free-form node label in key=value form (repeatable)
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("label '{raw}' is not in key=value form"))
}

fn build_config(args: Args) -> AgentConfig {
    let node_name = args
        .node_name
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "jobd".to_string());

    let mut identity = NodeIdentity::new(node_name);
    identity.memory_mb = args.memory_mb;
    for (key, value) in args.labels {
        identity = identity.with_label(key, value);
    }

    AgentConfig {
        listen_addr: args.listen,
        max_concurrent_jobs: args.max_jobs,
        tick_interval_ms: args.tick_ms,
        allowed_images: args.allow_image,
        sandbox: SandboxConfig {
            docker_bin: args.docker_bin,
            network_disabled: args.no_network,
        },
        identity,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(args);

    tracing::info!(
        node_id = %config.identity.node_id,
        node_name = %config.identity.node_name,
        listen = %config.listen_addr,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Starting jobd"
    );

    let shutdown = install_shutdown_handler();
    Agent::new(config).run(shutdown).await?;

    tracing::info!("Agent stopped");
    Ok(())
}
