//! Error types for workspace operations

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use workspace_runtime::RuntimeError;

/// Result type for workspace operations
pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Workspace errors
#[derive(Error, Debug, Clone)]
pub enum WorkspaceError {
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Runtime call timed out after {0:?}")]
    ProvisioningTimeout(Duration),

    #[error("Security policy violation: {0}")]
    SecurityPolicy(String),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded: {limit} requests per window, retry after {retry_after_secs}s")]
    RateLimitExceeded { limit: u32, retry_after_secs: u64 },
}

/// Stable, machine-readable error kind surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTier,
    InvalidRequest,
    ProvisioningError,
    ProvisioningTimeout,
    SecurityPolicyError,
    NotFound,
    Conflict,
    RateLimitExceeded,
}

impl WorkspaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkspaceError::UnknownTier(_) => ErrorKind::UnknownTier,
            WorkspaceError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            WorkspaceError::Provisioning(_) => ErrorKind::ProvisioningError,
            WorkspaceError::ProvisioningTimeout(_) => ErrorKind::ProvisioningTimeout,
            WorkspaceError::SecurityPolicy(_) => ErrorKind::SecurityPolicyError,
            WorkspaceError::NotFound(_) => ErrorKind::NotFound,
            WorkspaceError::Conflict(_) => ErrorKind::Conflict,
            WorkspaceError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
        }
    }

    /// HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::UnknownTier | ErrorKind::InvalidRequest => 400,
            ErrorKind::SecurityPolicyError => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::RateLimitExceeded => 429,
            ErrorKind::ProvisioningError => 502,
            ErrorKind::ProvisioningTimeout => 504,
        }
    }

    /// Seconds the caller should wait before retrying, where meaningful
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            WorkspaceError::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Map a runtime failure: a missing container is `NotFound`, a rejected
    /// payload is `InvalidRequest`, anything else is a provisioning failure.
    pub(crate) fn from_runtime(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(id) => WorkspaceError::NotFound(format!("container {}", id)),
            RuntimeError::InvalidConfig(msg) => WorkspaceError::InvalidRequest(msg),
            other => WorkspaceError::Provisioning(other.to_string()),
        }
    }
}
