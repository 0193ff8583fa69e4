//! Workspace container lifecycle
//!
//! Drives each workspace through its state machine against the container
//! runtime. Every mutating operation runs under the registry's per-id lock,
//! and every runtime call is bounded by the configured timeout. A failed or
//! timed-out create is always rolled back before the error is returned, so
//! the registry never points at a container that does not exist.

use crate::audit::{AuditAction, AuditEntry, AuditState, AuditTrail};
use crate::config::OrchestratorConfig;
use crate::error::{Result, WorkspaceError};
use crate::isolation::IsolationEnforcer;
use crate::registry::{
    TerminalSession, Workspace, WorkspaceGuard, WorkspaceId, WorkspaceRegistry, WorkspaceState,
};
use crate::tier::{ResourceProfile, Tier, TierPolicyResolver};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use workspace_runtime::{
    labels, ContainerRef, ContainerRuntime, ContainerSpec, ExecOutput, MountMode, MountSpec,
    RuntimeError, RuntimeSecuritySpec,
};

const MAX_NAME_LEN: usize = 64;
const MAX_OWNER_ID_LEN: usize = 128;
const MAX_COMMAND_ARGS: usize = 256;

/// Caller input for a new workspace
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkspace {
    pub name: String,
    /// Opaque secret handed to the container (e.g. an API key)
    #[serde(default)]
    pub secret: Option<SecretString>,
}

impl CreateWorkspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::from(secret.into()));
        self
    }
}

/// Workspace as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceView {
    pub id: WorkspaceId,
    pub name: String,
    pub owner_id: String,
    pub tier: Tier,
    pub status: WorkspaceState,
    pub container_ref: Option<ContainerRef>,
    pub terminal_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Container lifecycle controller
pub struct WorkspaceController {
    runtime: Arc<dyn ContainerRuntime>,
    config: OrchestratorConfig,
    tiers: Arc<TierPolicyResolver>,
    registry: WorkspaceRegistry,
    audit: AuditTrail,
}

impl WorkspaceController {
    pub fn new(runtime: impl ContainerRuntime + 'static, config: OrchestratorConfig) -> Self {
        Self::with_runtime(Arc::new(runtime), config)
    }

    pub fn with_runtime(runtime: Arc<dyn ContainerRuntime>, config: OrchestratorConfig) -> Self {
        let tiers = Arc::new(TierPolicyResolver::new(&config.tiers));
        let registry = WorkspaceRegistry::new(config.lock_timeout);
        let audit = AuditTrail::new(config.audit_capacity);
        Self {
            runtime,
            config,
            tiers,
            registry,
            audit,
        }
    }

    pub fn tiers(&self) -> Arc<TierPolicyResolver> {
        Arc::clone(&self.tiers)
    }

    pub fn registry(&self) -> &WorkspaceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Provision a workspace and start its container.
    ///
    /// The workspace is registered only once its container is running.
    pub async fn create(
        &self,
        owner_id: &str,
        request: CreateWorkspace,
        tier: &str,
    ) -> Result<WorkspaceView> {
        validate_owner_id(owner_id)?;
        let name = validate_name(&request.name)?;
        let (resources, security) = self.tiers.resolve(tier)?;

        let mut workspace = Workspace::new(owner_id, name, resources.tier);

        let runtime_security = match IsolationEnforcer::build(&security, &workspace.id, owner_id)
        {
            Ok(spec) => spec,
            Err(e) => {
                self.record(AuditAction::PolicyViolation, &workspace, None, Some(&e));
                return Err(e);
            }
        };
        if let Err(e) = self.verify_confinement(&runtime_security).await {
            self.record(AuditAction::PolicyViolation, &workspace, None, Some(&e));
            return Err(e);
        }

        workspace.transition(WorkspaceState::Provisioning)?;
        let spec = self.container_spec(
            &workspace,
            &resources,
            runtime_security,
            request.secret.as_ref(),
        );

        let container = match self
            .call(self.config.runtime_timeout, self.runtime.create_container(&spec))
            .await
        {
            Ok(container) => container,
            Err(e) => {
                if matches!(e, WorkspaceError::ProvisioningTimeout(_)) {
                    // No reference came back; the name is deterministic.
                    self.rollback(&ContainerRef::new(spec.name.clone())).await;
                }
                let e = as_provisioning(e);
                self.record(AuditAction::WorkspaceCreate, &workspace, None, Some(&e));
                error!(workspace_id = %workspace.id, error = %e, "Failed to create workspace container");
                return Err(e);
            }
        };

        if let Err(e) = self
            .call(self.config.runtime_timeout, self.runtime.start(&container))
            .await
        {
            self.rollback(&container).await;
            let e = as_provisioning(e);
            self.record(AuditAction::WorkspaceCreate, &workspace, Some(&container), Some(&e));
            error!(
                workspace_id = %workspace.id,
                container = %container,
                error = %e,
                "Failed to start workspace container, rolled back"
            );
            return Err(e);
        }

        workspace.container = Some(container.clone());
        workspace.transition(WorkspaceState::Running)?;
        if let Err(e) = self.registry.insert(workspace.clone()) {
            self.rollback(&container).await;
            return Err(e);
        }

        self.record(AuditAction::WorkspaceCreate, &workspace, Some(&container), None);
        info!(
            workspace_id = %workspace.id,
            owner_id = %owner_id,
            tier = %workspace.tier,
            container = %container,
            "Workspace created"
        );

        Ok(self.view(&workspace))
    }

    /// Current descriptor. A workspace whose container has vanished is
    /// dropped from the registry and reported as `NotFound`.
    pub async fn get(&self, owner_id: &str, id: WorkspaceId) -> Result<WorkspaceView> {
        let workspace = self.snapshot(owner_id, &id)?;

        if let Some(container) = &workspace.container {
            match self
                .call(self.config.runtime_timeout, self.runtime.inspect(container))
                .await
            {
                Ok(inspect) => {
                    debug!(workspace_id = %id, status = ?inspect.status, "Inspected workspace container");
                }
                Err(WorkspaceError::NotFound(_)) => {
                    self.forget_vanished(id, container).await;
                    return Err(WorkspaceError::NotFound(id.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self.view(&workspace))
    }

    /// Owner's workspaces, newest first. Never waits on a workspace lock.
    pub fn list(&self, owner_id: &str) -> Vec<WorkspaceView> {
        self.registry
            .list(owner_id)
            .iter()
            .map(|w| self.view(w))
            .collect()
    }

    /// Start a stopped workspace; a running one is returned unchanged
    pub async fn start(&self, owner_id: &str, id: WorkspaceId) -> Result<WorkspaceView> {
        self.registry
            .with_lock(id, |mut guard| async move {
                ensure_owner(&guard, owner_id)?;
                match guard.state {
                    WorkspaceState::Running => return Ok(self.view(&guard)),
                    WorkspaceState::Stopped => {}
                    other => {
                        return Err(WorkspaceError::Conflict(format!(
                            "cannot start workspace {} while {}",
                            id, other
                        )))
                    }
                }

                let container = live_container(&guard)?;
                if let Err(e) = self
                    .call(self.config.runtime_timeout, self.runtime.start(&container))
                    .await
                {
                    self.fail(&mut guard, container, AuditAction::WorkspaceStart, &e)
                        .await;
                    return Err(e);
                }

                guard.transition(WorkspaceState::Running)?;
                guard.commit();
                self.record(AuditAction::WorkspaceStart, &guard, Some(&container), None);
                info!(workspace_id = %id, "Workspace started");
                Ok(self.view(&guard))
            })
            .await
    }

    /// Stop a running workspace; a stopped one is returned unchanged
    pub async fn stop(&self, owner_id: &str, id: WorkspaceId) -> Result<WorkspaceView> {
        self.registry
            .with_lock(id, |mut guard| async move {
                ensure_owner(&guard, owner_id)?;
                match guard.state {
                    WorkspaceState::Stopped => return Ok(self.view(&guard)),
                    WorkspaceState::Running => {}
                    other => {
                        return Err(WorkspaceError::Conflict(format!(
                            "cannot stop workspace {} while {}",
                            id, other
                        )))
                    }
                }

                let container = live_container(&guard)?;
                guard.transition(WorkspaceState::Stopping)?;
                guard.commit();

                if let Err(e) = self.stop_container(&container).await {
                    self.fail(&mut guard, container, AuditAction::WorkspaceStop, &e)
                        .await;
                    return Err(e);
                }

                guard.transition(WorkspaceState::Stopped)?;
                guard.commit();
                self.record(AuditAction::WorkspaceStop, &guard, Some(&container), None);
                info!(workspace_id = %id, "Workspace stopped");
                Ok(self.view(&guard))
            })
            .await
    }

    /// Stop (if running) and remove the container, then drop the workspace.
    ///
    /// A second delete of the same id fails with `NotFound`.
    pub async fn delete(&self, owner_id: &str, id: WorkspaceId) -> Result<()> {
        self.registry
            .with_lock(id, |mut guard| async move {
                ensure_owner(&guard, owner_id)?;

                match guard.state {
                    WorkspaceState::Failed => {
                        let workspace = guard.remove();
                        self.record(AuditAction::WorkspaceRemove, &workspace, None, None);
                        info!(workspace_id = %id, "Failed workspace removed");
                        return Ok(());
                    }
                    WorkspaceState::Running | WorkspaceState::Stopped => {}
                    other => {
                        return Err(WorkspaceError::Conflict(format!(
                            "cannot delete workspace {} while {}",
                            id, other
                        )))
                    }
                }

                let container = live_container(&guard)?;

                let mut stopped = true;
                if guard.state == WorkspaceState::Running {
                    guard.transition(WorkspaceState::Stopping)?;
                    guard.commit();
                    match self.stop_container(&container).await {
                        Ok(()) => {
                            guard.transition(WorkspaceState::Stopped)?;
                            guard.commit();
                        }
                        // Removal below is forced.
                        Err(e) => {
                            warn!(workspace_id = %id, error = %e, "Graceful stop before delete failed");
                            stopped = false;
                        }
                    }
                }

                match self
                    .call(self.config.runtime_timeout, self.runtime.remove(&container))
                    .await
                {
                    Ok(()) | Err(WorkspaceError::NotFound(_)) => {}
                    Err(e) => {
                        let e = as_provisioning(e);
                        error!(workspace_id = %id, error = %e, "Failed to remove workspace container");
                        if stopped {
                            // Stopped with its container; delete can be retried.
                            self.record(AuditAction::WorkspaceRemove, &guard, Some(&container), Some(&e));
                        } else {
                            // Neither stopped nor removed: the container state is unknown.
                            self.fail(&mut guard, container, AuditAction::WorkspaceRemove, &e)
                                .await;
                        }
                        return Err(e);
                    }
                }

                guard.transition(WorkspaceState::Deleted)?;
                let workspace = guard.remove();
                self.record(AuditAction::WorkspaceRemove, &workspace, Some(&container), None);
                info!(workspace_id = %id, container = %container, "Workspace deleted");
                Ok(())
            })
            .await
    }

    /// Attach a terminal session to a running workspace
    pub async fn open_terminal(&self, owner_id: &str, id: WorkspaceId) -> Result<TerminalSession> {
        self.registry
            .with_lock(id, |mut guard| async move {
                ensure_owner(&guard, owner_id)?;
                if guard.state != WorkspaceState::Running {
                    return Err(WorkspaceError::Conflict(format!(
                        "workspace {} is {}, terminal requires running",
                        id, guard.state
                    )));
                }

                if let Some(session) = &guard.terminal {
                    return Ok(session.clone());
                }

                let session = TerminalSession {
                    id: Uuid::new_v4(),
                    url: self.terminal_url(&id),
                    opened_at: Utc::now(),
                };
                guard.terminal = Some(session.clone());
                guard.commit();

                let container = guard.container.clone();
                self.record(AuditAction::TerminalOpen, &guard, container.as_ref(), None);
                info!(workspace_id = %id, session_id = %session.id, "Terminal session opened");
                Ok(session)
            })
            .await
    }

    /// Detach the terminal session of a workspace, returning it if one was open
    pub async fn close_terminal(
        &self,
        owner_id: &str,
        id: WorkspaceId,
    ) -> Result<Option<TerminalSession>> {
        self.registry
            .with_lock(id, |mut guard| async move {
                ensure_owner(&guard, owner_id)?;
                let session = self.detach_terminal(&mut guard);
                Ok(session)
            })
            .await
    }

    /// Detach every open terminal session. Returns how many were closed.
    pub async fn close_all_terminals(&self) -> usize {
        let mut closed = 0;
        for id in self.registry.with_terminal() {
            let result = self
                .registry
                .with_lock(id, |mut guard| async move {
                    Ok(self.detach_terminal(&mut guard).is_some())
                })
                .await;
            match result {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!(workspace_id = %id, error = %e, "Could not close terminal session"),
            }
        }
        if closed > 0 {
            info!(count = closed, "Closed terminal sessions");
        }
        closed
    }

    /// Run a command inside a running workspace and collect its output.
    ///
    /// A failing command does not change the workspace state.
    pub async fn exec(
        &self,
        owner_id: &str,
        id: WorkspaceId,
        command: Vec<String>,
    ) -> Result<ExecOutput> {
        validate_command(&command)?;
        self.registry
            .with_lock(id, |guard| async move {
                ensure_owner(&guard, owner_id)?;
                if guard.state != WorkspaceState::Running {
                    return Err(WorkspaceError::Conflict(format!(
                        "workspace {} is {}, exec requires running",
                        id, guard.state
                    )));
                }

                let container = live_container(&guard)?;
                let result = self
                    .call(self.config.exec_timeout, self.runtime.exec(&container, &command))
                    .await
                    .map_err(as_provisioning);

                self.record(
                    AuditAction::WorkspaceExec,
                    &guard,
                    Some(&container),
                    result.as_ref().err(),
                );
                match &result {
                    Ok(output) => {
                        debug!(workspace_id = %id, exit_code = output.exit_code, "Command finished")
                    }
                    Err(e) => warn!(workspace_id = %id, error = %e, "Command failed"),
                }
                result
            })
            .await
    }

    /// Policy view of a workspace, recomputed from the registry and tier table
    pub fn audit(&self, owner_id: &str, id: WorkspaceId) -> Result<AuditState> {
        let workspace = self.snapshot(owner_id, &id)?;
        let (resources, security) = self.tiers.resolve_tier(workspace.tier);
        let runtime_security =
            IsolationEnforcer::build(&security, &workspace.id, &workspace.owner_id)?;
        let history = self.audit.for_workspace(&workspace.id);

        Ok(AuditState {
            workspace,
            resources: (*resources).clone(),
            security: (*security).clone(),
            runtime_security,
            history,
        })
    }

    /// Recorded lifecycle actions, oldest first
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.entries()
    }

    fn detach_terminal(&self, guard: &mut WorkspaceGuard) -> Option<TerminalSession> {
        let session = guard.terminal.take()?;
        guard.commit();
        let container = guard.container.clone();
        self.record(AuditAction::TerminalClose, guard, container.as_ref(), None);
        info!(workspace_id = %guard.id, session_id = %session.id, "Terminal session closed");
        Some(session)
    }

    fn snapshot(&self, owner_id: &str, id: &WorkspaceId) -> Result<Workspace> {
        self.registry
            .get(id)
            .filter(|w| w.owner_id == owner_id)
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))
    }

    fn view(&self, workspace: &Workspace) -> WorkspaceView {
        let terminal_url = match (&workspace.terminal, workspace.state) {
            (Some(session), _) => Some(session.url.clone()),
            (None, WorkspaceState::Running) => Some(self.terminal_url(&workspace.id)),
            _ => None,
        };
        WorkspaceView {
            id: workspace.id,
            name: workspace.name.clone(),
            owner_id: workspace.owner_id.clone(),
            tier: workspace.tier,
            status: workspace.state,
            container_ref: workspace.container.clone(),
            terminal_url,
            created_at: workspace.created_at,
        }
    }

    fn terminal_url(&self, id: &WorkspaceId) -> String {
        format!(
            "{}/terminal/{}",
            self.config.terminal_base_url.trim_end_matches('/'),
            id
        )
    }

    fn container_spec(
        &self,
        workspace: &Workspace,
        resources: &ResourceProfile,
        security: RuntimeSecuritySpec,
        secret: Option<&SecretString>,
    ) -> ContainerSpec {
        let mut env = HashMap::new();
        env.insert("WORKSPACE_ID".to_string(), workspace.id.to_string());
        env.insert("OWNER_ID".to_string(), workspace.owner_id.clone());
        env.insert("WORKSPACE_TIER".to_string(), workspace.tier.to_string());
        if let Some(secret) = secret {
            env.insert(
                self.config.secret_env_var.clone(),
                secret.expose_secret().to_string(),
            );
        }

        let host_path = self
            .config
            .mount_root
            .join(&workspace.owner_id)
            .join(workspace.id.to_string());

        let mut spec_labels = HashMap::new();
        spec_labels.insert(labels::WORKSPACE_ID.to_string(), workspace.id.to_string());
        spec_labels.insert(labels::OWNER_ID.to_string(), workspace.owner_id.clone());
        spec_labels.insert(labels::TIER.to_string(), workspace.tier.to_string());
        spec_labels.insert(
            labels::MEMORY_BYTES.to_string(),
            resources.memory_limit_bytes.to_string(),
        );
        spec_labels.insert(labels::CPU_QUOTA.to_string(), resources.cpu_quota.to_string());
        spec_labels.insert(
            labels::STORAGE_BYTES.to_string(),
            resources.storage_bytes.to_string(),
        );

        ContainerSpec {
            image: self.config.image.clone(),
            name: format!("workspace-{}", workspace.id),
            env,
            mounts: vec![MountSpec {
                host_path: host_path.to_string_lossy().into_owned(),
                container_path: self.config.mount_target.clone(),
                mode: MountMode::ReadWrite,
            }],
            memory_limit_bytes: resources.memory_limit_bytes,
            cpu_quota: resources.cpu_quota,
            pids_limit: resources.pids_limit,
            security,
            labels: spec_labels,
        }
    }

    async fn verify_confinement(&self, spec: &RuntimeSecuritySpec) -> Result<()> {
        let verify = IsolationEnforcer::verify(self.runtime.as_ref(), spec);
        match tokio::time::timeout(self.config.runtime_timeout, verify).await {
            Ok(result) => result,
            Err(_) => Err(WorkspaceError::SecurityPolicy(format!(
                "timed out resolving confinement profile {}",
                spec.confinement_profile
            ))),
        }
    }

    async fn stop_container(&self, container: &ContainerRef) -> Result<()> {
        // The runtime may legitimately take the whole grace period.
        let limit = self.config.runtime_timeout + self.config.stop_timeout;
        self.call(limit, self.runtime.stop(container, self.config.stop_timeout))
            .await
    }

    /// Bound a runtime call and map its error into the workspace taxonomy
    async fn call<T, F>(&self, limit: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RuntimeError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(WorkspaceError::from_runtime),
            Err(_) => Err(WorkspaceError::ProvisioningTimeout(limit)),
        }
    }

    /// Best-effort removal of a partially provisioned container
    async fn rollback(&self, container: &ContainerRef) {
        match tokio::time::timeout(self.config.runtime_timeout, self.runtime.remove(container))
            .await
        {
            Ok(Ok(())) => info!(container = %container, "Rolled back workspace container"),
            Ok(Err(e)) if e.is_not_found() => {
                debug!(container = %container, "Nothing to roll back")
            }
            Ok(Err(e)) => error!(container = %container, error = %e, "Rollback failed"),
            Err(_) => error!(container = %container, "Rollback timed out"),
        }
    }

    /// Runtime failure on an existing workspace: tear the container down and
    /// park the workspace in `Failed`
    async fn fail(
        &self,
        guard: &mut WorkspaceGuard,
        container: ContainerRef,
        action: AuditAction,
        err: &WorkspaceError,
    ) {
        self.rollback(&container).await;
        guard.container = None;
        if let Err(e) = guard.transition(WorkspaceState::Failed) {
            error!(workspace_id = %guard.id, error = %e, "Could not mark workspace failed");
        }
        guard.commit();
        self.record(action, guard, Some(&container), Some(err));
        warn!(workspace_id = %guard.id, error = %err, "Workspace failed");
    }

    async fn forget_vanished(&self, id: WorkspaceId, container: &ContainerRef) {
        let Ok(guard) = self.registry.lock(id).await else {
            return;
        };
        if guard.container.as_ref() != Some(container) {
            return;
        }
        warn!(workspace_id = %id, container = %container, "Workspace container vanished, dropping entry");
        let workspace = guard.remove();
        let err = WorkspaceError::NotFound(format!("container {}", container));
        self.record(AuditAction::WorkspaceRemove, &workspace, Some(container), Some(&err));
    }

    fn record(
        &self,
        action: AuditAction,
        workspace: &Workspace,
        container: Option<&ContainerRef>,
        err: Option<&WorkspaceError>,
    ) {
        self.audit.record(AuditEntry {
            timestamp: Utc::now(),
            action,
            workspace_id: workspace.id,
            owner_id: workspace.owner_id.clone(),
            container: container.cloned(),
            success: err.is_none(),
            error: err.map(|e| e.to_string()),
        });
    }
}

fn ensure_owner(workspace: &Workspace, owner_id: &str) -> Result<()> {
    if workspace.owner_id != owner_id {
        return Err(WorkspaceError::NotFound(workspace.id.to_string()));
    }
    Ok(())
}

fn live_container(workspace: &Workspace) -> Result<ContainerRef> {
    workspace.container.clone().ok_or_else(|| {
        WorkspaceError::Conflict(format!("workspace {} has no container", workspace.id))
    })
}

/// A missing container during provisioning is a provisioning failure
fn as_provisioning(err: WorkspaceError) -> WorkspaceError {
    match err {
        WorkspaceError::NotFound(msg) => WorkspaceError::Provisioning(msg),
        other => other,
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WorkspaceError::InvalidRequest(
            "workspace name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(WorkspaceError::InvalidRequest(format!(
            "workspace name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(WorkspaceError::InvalidRequest(
            "workspace name contains control characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_command(command: &[String]) -> Result<()> {
    let Some(program) = command.first() else {
        return Err(WorkspaceError::InvalidRequest(
            "command must not be empty".to_string(),
        ));
    };
    if program.trim().is_empty() {
        return Err(WorkspaceError::InvalidRequest(
            "command program must not be blank".to_string(),
        ));
    }
    if command.len() > MAX_COMMAND_ARGS {
        return Err(WorkspaceError::InvalidRequest(format!(
            "command has more than {} arguments",
            MAX_COMMAND_ARGS
        )));
    }
    if command.iter().any(|arg| arg.contains('\0')) {
        return Err(WorkspaceError::InvalidRequest(
            "command contains NUL bytes".to_string(),
        ));
    }
    Ok(())
}

/// The owner id becomes a directory name under the mount root
fn validate_owner_id(owner_id: &str) -> Result<()> {
    let invalid = owner_id.is_empty()
        || owner_id.len() > MAX_OWNER_ID_LEN
        || owner_id == "."
        || owner_id == ".."
        || owner_id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(WorkspaceError::InvalidRequest(format!(
            "invalid owner id: {:?}",
            owner_id
        )));
    }
    Ok(())
}
