//! Docker-backed container runtime
//!
//! This is the only component that talks to the Docker socket. It turns a
//! validated [`ContainerSpec`] into a non-privileged container on the
//! isolated workspace network.

use crate::runtime::ContainerRuntime;
use crate::types::*;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default location of the kernel's loaded AppArmor profile list
pub const DEFAULT_APPARMOR_PROFILES: &str = "/sys/kernel/security/apparmor/profiles";

/// Docker runtime configuration
#[derive(Debug, Clone)]
pub struct DockerRuntimeConfig {
    /// File listing loaded AppArmor profiles
    pub apparmor_profiles_path: PathBuf,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            apparmor_profiles_path: PathBuf::from(DEFAULT_APPARMOR_PROFILES),
        }
    }
}

/// Container runtime backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    config: DockerRuntimeConfig,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon
    pub async fn connect(config: DockerRuntimeConfig) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| anyhow::anyhow!("Failed to connect to Docker: {}", e))?;

        // Verify connection
        docker
            .ping()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to ping Docker: {}", e))?;

        info!("Workspace runtime connected to Docker daemon");

        Ok(Self { docker, config })
    }

    /// Ensure a workspace network exists.
    ///
    /// The network is a bridge with inter-container communication disabled,
    /// so workspaces of different tenants cannot reach each other.
    pub async fn ensure_network(&self, network_name: &str) -> anyhow::Result<()> {
        let networks = self.docker.list_networks::<String>(None).await?;
        let exists = networks.iter().any(|n| {
            n.name
                .as_ref()
                .map(|name| name == network_name)
                .unwrap_or(false)
        });

        if !exists {
            let mut options = HashMap::new();
            options.insert(
                "com.docker.network.bridge.enable_icc".to_string(),
                "false".to_string(),
            );

            let network = CreateNetworkOptions {
                name: network_name.to_string(),
                driver: "bridge".to_string(),
                options,
                ..Default::default()
            };

            self.docker.create_network(network).await?;
            info!(network = %network_name, "Created isolated workspace network");
        }

        Ok(())
    }
}

/// Build the Docker create payload for a workspace container
pub(crate) fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut labels = spec.labels.clone();
    labels.extend(spec.security.labels.clone());
    labels.insert(
        labels::CREATED_BY.to_string(),
        "workspace-runtime".to_string(),
    );
    labels.insert(labels::MANAGED.to_string(), "true".to_string());

    let mut env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.sort();

    let mounts: Vec<bollard::models::Mount> = spec
        .mounts
        .iter()
        .map(|m| bollard::models::Mount {
            target: Some(m.container_path.clone()),
            source: Some(m.host_path.clone()),
            typ: Some(bollard::models::MountTypeEnum::BIND),
            read_only: Some(m.mode == MountMode::ReadOnly),
            ..Default::default()
        })
        .collect();

    let security = &spec.security;

    let host_config = HostConfig {
        memory: Some(spec.memory_limit_bytes),
        nano_cpus: Some((spec.cpu_quota * 1_000_000_000.0) as i64),
        pids_limit: Some(spec.pids_limit),
        network_mode: Some(security.network.clone()),
        mounts: Some(mounts),
        // SECURITY: Non-privileged container settings
        privileged: Some(false),
        cap_drop: Some(security.cap_drop.clone()),
        cap_add: Some(security.cap_add.clone()),
        security_opt: Some(security.security_opts()),
        readonly_rootfs: Some(security.read_only_root),
        pid_mode: match security.pid_namespace {
            PidNamespace::Private => None,
            PidNamespace::Host => Some("host".to_string()),
        },
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            maximum_retry_count: None,
        }),
        auto_remove: Some(false),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        hostname: Some(spec.name.clone()),
        user: Some(security.user.to_string()),
        env: Some(env),
        labels: Some(labels),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Whether `name` appears in the kernel's AppArmor profile list.
///
/// Each line has the form `name (mode)`.
pub(crate) fn profile_listed(profiles: &str, name: &str) -> bool {
    profiles.lines().any(|line| {
        let listed = match line.rfind(" (") {
            Some(idx) => &line[..idx],
            None => line,
        };
        listed.trim() == name
    })
}

/// Create the host directories behind read-write bind mounts.
///
/// Returns the directories this call created, parents first, so a failed
/// create can hand them to [`discard_volumes`].
pub(crate) async fn prepare_volumes(spec: &ContainerSpec) -> Result<Vec<PathBuf>, RuntimeError> {
    let mut created = Vec::new();
    for mount in spec.mounts.iter().filter(|m| m.mode == MountMode::ReadWrite) {
        let path = Path::new(&mount.host_path);
        if !path.is_absolute() {
            discard_volumes(&created).await;
            return Err(RuntimeError::InvalidConfig(format!(
                "mount source {} is not an absolute path",
                mount.host_path
            )));
        }

        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(dir) = current {
            if tokio::fs::try_exists(dir).await.unwrap_or(true) {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }

        if let Err(e) = tokio::fs::create_dir_all(path).await {
            discard_volumes(&created).await;
            return Err(RuntimeError::Internal(format!(
                "failed to prepare volume {}: {}",
                mount.host_path, e
            )));
        }
        created.extend(missing.into_iter().rev());
    }
    Ok(created)
}

/// Remove directories left by [`prepare_volumes`], deepest first.
/// Non-empty directories are kept.
pub(crate) async fn discard_volumes(created: &[PathBuf]) {
    for dir in created.iter().rev() {
        if let Err(e) = tokio::fs::remove_dir(dir).await {
            warn!(path = %dir.display(), error = %e, "Failed to remove unused volume directory");
        }
    }
}

fn map_docker_error(err: bollard::errors::Error, container: &str) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(container.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::AlreadyExists(container.to_string()),
        e => RuntimeError::Docker(e.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError> {
        // Bind sources must exist before Docker will accept the mount.
        let created = prepare_volumes(spec).await?;

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = match self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                discard_volumes(&created).await;
                return Err(map_docker_error(e, &spec.name));
            }
        };

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }

        let container_id = response.id[..12.min(response.id.len())].to_string();
        info!(
            container_id = %container_id,
            name = %spec.name,
            runtime_version = RUNTIME_VERSION,
            "Container created"
        );
        Ok(ContainerRef::new(container_id))
    }

    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        match self
            .docker
            .start_container(container.as_str(), None::<StartContainerOptions<String>>)
            .await
        {
            Ok(_) => {
                info!(container_id = %container, "Container started");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                // Already running
                Ok(())
            }
            Err(e) => Err(map_docker_error(e, container.as_str())),
        }
    }

    async fn stop(&self, container: &ContainerRef, grace: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self
            .docker
            .stop_container(container.as_str(), Some(options))
            .await
        {
            Ok(_) => {
                info!(container_id = %container, "Container stopped");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                // Already stopped
                Ok(())
            }
            Err(e) => Err(map_docker_error(e, container.as_str())),
        }
    }

    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container.as_str(), Some(options))
            .await
            .map_err(|e| map_docker_error(e, container.as_str()))?;

        info!(container_id = %container, "Container removed");
        Ok(())
    }

    async fn inspect(&self, container: &ContainerRef) -> Result<ContainerInspect, RuntimeError> {
        let info = self
            .docker
            .inspect_container(container.as_str(), None)
            .await
            .map_err(|e| map_docker_error(e, container.as_str()))?;

        let status = match info.state.as_ref().and_then(|s| s.status.as_ref()) {
            Some(bollard::models::ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
            Some(bollard::models::ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
            Some(bollard::models::ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
            Some(bollard::models::ContainerStateStatusEnum::RESTARTING) => {
                ContainerStatus::Restarting
            }
            Some(bollard::models::ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
            Some(bollard::models::ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        };

        let labels = info
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        Ok(ContainerInspect {
            container: container.clone(),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            status,
            image: info
                .config
                .as_ref()
                .and_then(|c| c.image.clone())
                .unwrap_or_default(),
            created_at: info
                .created
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(chrono::Utc::now),
            labels,
        })
    }

    async fn exec(
        &self,
        container: &ContainerRef,
        command: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        if command.is_empty() {
            return Err(RuntimeError::InvalidConfig("empty command".to_string()));
        }

        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container.as_str(), options)
            .await
            .map_err(|e| map_docker_error(e, container.as_str()))?;

        let mut output = ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
        };

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_docker_error(e, container.as_str()))?;

        if let StartExecResults::Attached { output: mut stream, .. } = started {
            while let Some(chunk) = stream.next().await {
                match chunk.map_err(|e| RuntimeError::Docker(e.to_string()))? {
                    bollard::container::LogOutput::StdOut { message } => {
                        output.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::Docker(e.to_string()))?;
        output.exit_code = inspect.exit_code.unwrap_or(-1);

        debug!(container_id = %container, exit_code = output.exit_code, "Exec finished");
        Ok(output)
    }

    async fn confinement_profile_loaded(&self, profile: &str) -> Result<bool, RuntimeError> {
        match tokio::fs::read_to_string(&self.config.apparmor_profiles_path).await {
            Ok(contents) => {
                let loaded = profile_listed(&contents, profile);
                debug!(profile = %profile, loaded, "Checked confinement profile");
                Ok(loaded)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %self.config.apparmor_profiles_path.display(),
                    "AppArmor profile list not available"
                );
                Ok(false)
            }
            Err(e) => Err(RuntimeError::Internal(format!(
                "Failed to read AppArmor profiles: {}",
                e
            ))),
        }
    }
}
