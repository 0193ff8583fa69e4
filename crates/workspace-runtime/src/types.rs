//! Core types shared between the workspace orchestrator and container runtimes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque handle to a container known to the runtime.
///
/// Docker accepts either a container id or a container name here, which the
/// orchestrator relies on when rolling back a create whose id never came back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerRef(String);

impl ContainerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the runtime needs to create a workspace container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,

    /// Container name (also used as hostname)
    pub name: String,

    /// Environment variables. May contain secrets: never log this map.
    pub env: HashMap<String, String>,

    /// Bind mounts
    pub mounts: Vec<MountSpec>,

    /// Memory ceiling in bytes
    pub memory_limit_bytes: i64,

    /// CPU quota as a fraction of one core (0.5, 2.0, ...)
    pub cpu_quota: f64,

    /// Maximum number of PIDs (prevents fork bombs)
    pub pids_limit: i64,

    /// Security directives, already validated by the orchestrator
    pub security: RuntimeSecuritySpec,

    /// Labels for container metadata
    pub labels: HashMap<String, String>,
}

/// Bind mount configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Source path on host
    pub host_path: String,

    /// Target path in container
    pub container_path: String,

    pub mode: MountMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

/// PID namespace the container joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidNamespace {
    /// Own PID namespace (runtime default)
    Private,
    /// Host PID namespace. Never accepted for workspaces.
    Host,
}

/// Uid/gid the container process runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    pub uid: u32,
    pub gid: u32,
}

impl UserMapping {
    pub fn is_root(&self) -> bool {
        self.uid == 0 || self.gid == 0
    }
}

impl fmt::Display for UserMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Concrete security directives submitted with a container create call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSecuritySpec {
    /// Name of the pre-installed confinement (AppArmor) profile
    pub confinement_profile: String,

    /// Capabilities dropped (always `ALL`)
    pub cap_drop: Vec<String>,

    /// Capabilities re-added from the fixed allow-list
    pub cap_add: Vec<String>,

    /// Isolated network the container is attached to
    pub network: String,

    pub user: UserMapping,

    pub read_only_root: bool,

    pub pid_namespace: PidNamespace,

    pub no_new_privileges: bool,

    /// Ownership labels stamped on the container
    pub labels: HashMap<String, String>,
}

impl RuntimeSecuritySpec {
    /// Render `--security-opt` style entries
    pub fn security_opts(&self) -> Vec<String> {
        let mut opts = vec![format!("apparmor={}", self.confinement_profile)];
        if self.no_new_privileges {
            opts.push("no-new-privileges:true".to_string());
        }
        opts
    }
}

/// Container status as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

/// Result of inspecting a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInspect {
    pub container: ContainerRef,

    pub name: String,

    pub status: ContainerStatus,

    pub image: String,

    /// Created timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,

    pub labels: HashMap<String, String>,
}

/// Collected output of a command run inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; -1 when the runtime did not report one
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors reported by a container runtime
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Docker error: {0}")]
    Docker(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Standard labels applied to all workspace containers
pub mod labels {
    pub const WORKSPACE_ID: &str = "workspace.id";
    pub const OWNER_ID: &str = "workspace.owner.id";
    pub const TIER: &str = "workspace.tier";
    pub const MEMORY_BYTES: &str = "workspace.resources.memory";
    pub const CPU_QUOTA: &str = "workspace.resources.cpus";
    pub const STORAGE_BYTES: &str = "workspace.resources.storage";
    pub const CREATED_BY: &str = "workspace.created-by";
    pub const MANAGED: &str = "workspace.managed";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_security() -> RuntimeSecuritySpec {
        RuntimeSecuritySpec {
            confinement_profile: "workspace-container-profile".to_string(),
            cap_drop: vec!["ALL".to_string()],
            cap_add: vec!["CHOWN".to_string()],
            network: "workspace-net".to_string(),
            user: UserMapping {
                uid: 1000,
                gid: 1000,
            },
            read_only_root: false,
            pid_namespace: PidNamespace::Private,
            no_new_privileges: true,
            labels: HashMap::new(),
        }
    }

    #[test]
    fn test_security_opts_include_profile_and_no_new_privileges() {
        let opts = sample_security().security_opts();
        assert_eq!(
            opts,
            vec![
                "apparmor=workspace-container-profile".to_string(),
                "no-new-privileges:true".to_string()
            ]
        );
    }

    #[test]
    fn test_user_mapping_root_detection() {
        assert!(UserMapping { uid: 0, gid: 1000 }.is_root());
        assert!(UserMapping { uid: 1000, gid: 0 }.is_root());
        assert!(!UserMapping {
            uid: 1000,
            gid: 1000
        }
        .is_root());
        assert_eq!(
            UserMapping {
                uid: 1000,
                gid: 1001
            }
            .to_string(),
            "1000:1001"
        );
    }

    #[test]
    fn test_container_ref_serializes_transparently() {
        let json = serde_json::to_string(&ContainerRef::new("abc123")).unwrap();
        assert_eq!(json, "\"abc123\"");
    }

    #[test]
    fn test_runtime_error_not_found() {
        assert!(RuntimeError::NotFound("x".into()).is_not_found());
        assert!(!RuntimeError::Docker("x".into()).is_not_found());
    }
}
