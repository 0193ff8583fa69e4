//! Container runtime abstraction
//!
//! The orchestrator never talks to Docker directly. It is handed an
//! implementation of [`ContainerRuntime`] at construction time, which keeps
//! the lifecycle logic testable against an in-process fake.

use crate::types::{ContainerInspect, ContainerRef, ContainerSpec, ExecOutput, RuntimeError};
use async_trait::async_trait;
use std::time::Duration;

/// Operations the orchestrator needs from a container runtime.
///
/// Every method is a blocking I/O call from the caller's point of view;
/// callers must not hold any lock wider than a single workspace across them.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError>;

    /// Start a created or stopped container. Starting a running container is a no-op.
    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    /// Stop a running container, killing it after `grace`.
    /// Stopping a stopped container is a no-op.
    async fn stop(&self, container: &ContainerRef, grace: Duration) -> Result<(), RuntimeError>;

    /// Force-remove a container. Returns `RuntimeError::NotFound` if it is already gone.
    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    /// Inspect a container
    async fn inspect(&self, container: &ContainerRef) -> Result<ContainerInspect, RuntimeError>;

    /// Run `command` inside a running container and collect its output
    async fn exec(
        &self,
        container: &ContainerRef,
        command: &[String],
    ) -> Result<ExecOutput, RuntimeError>;

    /// Whether the named confinement profile is installed and loaded
    async fn confinement_profile_loaded(&self, profile: &str) -> Result<bool, RuntimeError>;
}
