//! Configuration types for the workspace orchestrator
//!
//! `OrchestratorConfig` is serializable with human-friendly duration fields
//! (plain seconds) so it can be kept in a JSON file next to the broker.

use crate::admission::AdmissionConfig;
use crate::tier::{Tier, TierTable, CAPABILITY_ALLOW_LIST, CAP_DROP_ALL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Orchestrator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Image every workspace container runs
    pub image: String,
    /// Host directory under which `{owner_id}/{workspace_id}` volumes live
    pub mount_root: PathBuf,
    /// Mount point of the workspace volume inside the container
    pub mount_target: String,
    /// Environment variable carrying the caller-supplied secret
    pub secret_env_var: String,
    /// Base URL terminal sessions are served from
    pub terminal_base_url: String,
    /// Upper bound for a single container runtime call
    #[serde(with = "humantime_serde")]
    pub runtime_timeout: Duration,
    /// Grace period given to a container before it is killed on stop
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    /// How long a mutating call waits for the workspace lock
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
    /// Upper bound for a command run inside a workspace
    #[serde(with = "humantime_serde")]
    pub exec_timeout: Duration,
    /// Maximum retained audit entries
    pub audit_capacity: usize,
    pub tiers: TierTable,
    pub admission: AdmissionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            image: "workspace/sandbox:latest".to_string(),
            mount_root: PathBuf::from("/user_mounts"),
            mount_target: "/workspace".to_string(),
            secret_env_var: "ANTHROPIC_API_KEY".to_string(),
            terminal_base_url: "http://localhost:8080".to_string(),
            runtime_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(60),
            exec_timeout: Duration::from_secs(30),
            audit_capacity: 10_000,
            tiers: TierTable::default(),
            admission: AdmissionConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

impl OrchestratorConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that would weaken isolation or
    /// make the controller unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.trim().is_empty() {
            return Err(invalid("image", "must not be empty"));
        }
        if !self.mount_root.is_absolute() {
            return Err(invalid("mount_root", "must be an absolute path"));
        }
        if !self.mount_target.starts_with('/') {
            return Err(invalid("mount_target", "must be an absolute path"));
        }
        if self.secret_env_var.is_empty() {
            return Err(invalid("secret_env_var", "must not be empty"));
        }
        if self.runtime_timeout.is_zero() {
            return Err(invalid("runtime_timeout", "must be positive"));
        }
        if self.lock_timeout.is_zero() {
            return Err(invalid("lock_timeout", "must be positive"));
        }
        if self.exec_timeout.is_zero() {
            return Err(invalid("exec_timeout", "must be positive"));
        }
        if self.audit_capacity == 0 {
            return Err(invalid("audit_capacity", "must be positive"));
        }

        for tier in Tier::ALL {
            let policy = self.tiers.get(tier);
            let field = |name: &str| format!("tiers.{}.{}", tier, name);

            if policy.resources.tier != tier {
                return Err(invalid(field("resources.tier"), "does not match its key"));
            }
            if policy.resources.memory_limit_bytes <= 0 {
                return Err(invalid(field("resources.memory_limit_bytes"), "must be positive"));
            }
            if !(policy.resources.cpu_quota > 0.0) {
                return Err(invalid(field("resources.cpu_quota"), "must be positive"));
            }
            if policy.resources.requests_per_minute == 0 {
                return Err(invalid(field("resources.requests_per_minute"), "must be positive"));
            }
            if policy.resources.pids_limit <= 0 {
                return Err(invalid(field("resources.pids_limit"), "must be positive"));
            }
            if policy.security.confinement_profile.trim().is_empty() {
                return Err(invalid(field("security.confinement_profile"), "must not be empty"));
            }
            if !policy.security.cap_drop.iter().any(|c| c == CAP_DROP_ALL) {
                return Err(invalid(field("security.cap_drop"), "must drop ALL"));
            }
            if let Some(cap) = policy
                .security
                .cap_add
                .iter()
                .find(|c| !CAPABILITY_ALLOW_LIST.contains(&c.as_str()))
            {
                return Err(invalid(
                    field("security.cap_add"),
                    format!("{} is not in the capability allow-list", cap),
                ));
            }
        }

        self.admission.validate()
    }
}

/// Humantime serde helper
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
