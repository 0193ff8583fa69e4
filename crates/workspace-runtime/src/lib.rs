//! Workspace Runtime
//!
//! Container runtime collaborator for sandboxed workspaces:
//! - Defines the [`ContainerRuntime`] trait the orchestrator is built against
//! - Carries validated security directives (capabilities, AppArmor profile,
//!   isolated network, uid/gid mapping) down to the runtime
//! - Ships a Docker implementation that creates non-privileged containers on
//!   an isolated network with inter-container traffic disabled
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │ Workspace       │    │ ContainerRuntime│    │ Docker Daemon   │
//! │ Orchestrator    │───▶│ (DockerRuntime) │───▶│                 │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```

pub mod docker;
pub mod runtime;
pub mod types;

pub use docker::{DockerRuntime, DockerRuntimeConfig, DEFAULT_APPARMOR_PROFILES};
pub use runtime::ContainerRuntime;
pub use types::*;
