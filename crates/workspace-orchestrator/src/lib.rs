//! Workspace Orchestrator
//!
//! Provisions per-user sandboxed workspaces backed by isolated containers.
//! Provides:
//! - Container lifecycle (create, start, stop, delete) with rollback
//! - Tier-based resource and security policy
//! - Sliding-window admission control per client
//! - A Unix-socket service exposing all of the above to the routing layer

pub mod admission;
pub mod audit;
pub mod config;
pub mod error;
pub mod isolation;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod tier;

#[cfg(test)]
pub(crate) mod test_support;

pub use admission::*;
pub use audit::*;
pub use config::*;
pub use error::*;
pub use isolation::*;
pub use lifecycle::*;
pub use protocol::*;
pub use registry::*;
pub use service::*;
pub use tier::*;

use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use workspace_runtime::ContainerRuntime;

/// Wires the controller, admission and socket service around one runtime
pub struct WorkspaceOrchestrator {
    service: WorkspaceService,
}

impl WorkspaceOrchestrator {
    pub fn new(runtime: impl ContainerRuntime + 'static, config: OrchestratorConfig) -> Self {
        let admission_config = config.admission.clone();
        let controller = Arc::new(WorkspaceController::new(runtime, config));
        let admission = Arc::new(AdmissionController::new(
            admission_config,
            controller.tiers(),
        ));
        Self {
            service: WorkspaceService::new(controller, admission),
        }
    }

    pub fn service(&self) -> &WorkspaceService {
        &self.service
    }

    pub fn controller(&self) -> &Arc<WorkspaceController> {
        self.service.controller()
    }

    /// Start the periodic rate-limit bucket evictor
    pub fn start_eviction(&self) -> JoinHandle<()> {
        self.service.admission().spawn_evictor()
    }

    /// Serve the protocol on `socket_path`
    pub async fn serve(&self, socket_path: &Path) -> anyhow::Result<()> {
        self.service.run(socket_path).await
    }

    /// Detach all terminal sessions before the process exits
    pub async fn shutdown(&self) -> usize {
        self.controller().close_all_terminals().await
    }
}
