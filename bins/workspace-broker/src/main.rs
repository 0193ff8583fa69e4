//! Workspace Broker Daemon
//!
//! The only process that talks to the Docker socket. Accepts workspace
//! requests from the routing layer on a Unix socket, applies admission
//! control and tier policy, and drives workspace containers.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use workspace_orchestrator::{OrchestratorConfig, WorkspaceOrchestrator};
use workspace_runtime::{DockerRuntime, DockerRuntimeConfig, DEFAULT_APPARMOR_PROFILES};

const DEFAULT_SOCKET: &str = "/var/run/workspace/broker.sock";

#[derive(Parser, Debug)]
#[command(name = "workspace-broker")]
#[command(about = "Workspace broker - admission-controlled sandbox provisioning")]
struct Args {
    /// Unix socket path
    #[arg(long, env = "BROKER_SOCKET", default_value = DEFAULT_SOCKET)]
    socket: PathBuf,

    /// JSON configuration file
    #[arg(long, env = "BROKER_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace container image
    #[arg(long, env = "WORKSPACE_IMAGE")]
    image: Option<String>,

    /// Host directory holding per-owner workspace volumes
    #[arg(long, env = "WORKSPACE_MOUNT_ROOT")]
    mount_root: Option<PathBuf>,

    /// Isolated network for every tier
    #[arg(long, env = "WORKSPACE_NETWORK")]
    network: Option<String>,

    /// Kernel AppArmor profile list
    #[arg(long, env = "APPARMOR_PROFILES", default_value = DEFAULT_APPARMOR_PROFILES)]
    apparmor_profiles: PathBuf,

    /// Seconds between rate-limit bucket eviction sweeps
    #[arg(long, env = "EVICTION_INTERVAL_SECS")]
    eviction_interval_secs: Option<u64>,
}

/// Load the configuration file (if any) and apply command-line overrides
fn load_config(args: &Args) -> anyhow::Result<OrchestratorConfig> {
    let mut config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::default(),
    };

    if let Some(image) = &args.image {
        config.image = image.clone();
    }
    if let Some(mount_root) = &args.mount_root {
        config.mount_root = mount_root.clone();
    }
    if let Some(network) = &args.network {
        config.tiers.free.security.network = network.clone();
        config.tiers.pro.security.network = network.clone();
        config.tiers.enterprise.security.network = network.clone();
    }
    if let Some(secs) = args.eviction_interval_secs {
        config.admission.eviction_interval = Duration::from_secs(secs);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("workspace_orchestrator=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Workspace broker starting");

    let config = load_config(&args)?;
    info!(
        image = %config.image,
        mount_root = %config.mount_root.display(),
        runtime_timeout_secs = config.runtime_timeout.as_secs(),
        "Configuration loaded"
    );

    let runtime = DockerRuntime::connect(DockerRuntimeConfig {
        apparmor_profiles_path: args.apparmor_profiles.clone(),
    })
    .await?;

    for network in config.tiers.networks() {
        runtime.ensure_network(&network).await?;
    }

    let orchestrator = WorkspaceOrchestrator::new(runtime, config);
    let evictor = orchestrator.start_eviction();

    tokio::select! {
        result = orchestrator.serve(&args.socket) => {
            evictor.abort();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received");
            evictor.abort();
        }
    }

    let closed = orchestrator.shutdown().await;
    info!(terminal_sessions = closed, "Detached terminal sessions");

    info!("Workspace broker stopped");
    Ok(())
}
