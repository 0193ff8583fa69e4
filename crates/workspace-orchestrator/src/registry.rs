//! Workspace registry
//!
//! Authoritative in-memory map from workspace id to descriptor. Mutations on
//! one id are serialized by that id's async lock; unrelated ids never
//! contend. Readers see the last committed snapshot and never wait on a
//! workspace lock.

use crate::error::{Result, WorkspaceError};
use crate::tier::Tier;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;
use workspace_runtime::ContainerRef;

/// Opaque workspace identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WorkspaceId {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| WorkspaceError::InvalidRequest(format!("malformed workspace id: {}", s)))
    }
}

/// Workspace lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    Requested,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Deleted,
    Failed,
}

impl WorkspaceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceState::Requested => "requested",
            WorkspaceState::Provisioning => "provisioning",
            WorkspaceState::Running => "running",
            WorkspaceState::Stopping => "stopping",
            WorkspaceState::Stopped => "stopped",
            WorkspaceState::Deleted => "deleted",
            WorkspaceState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkspaceState::Deleted | WorkspaceState::Failed)
    }

    /// States in which the workspace owns a container in the runtime
    pub fn holds_container(&self) -> bool {
        matches!(
            self,
            WorkspaceState::Provisioning
                | WorkspaceState::Running
                | WorkspaceState::Stopping
                | WorkspaceState::Stopped
        )
    }

    pub fn can_transition_to(&self, next: WorkspaceState) -> bool {
        use WorkspaceState::*;
        match (self, next) {
            (Deleted, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Requested, Provisioning) => true,
            (Provisioning, Running) => true,
            (Running, Stopping) | (Running, Deleted) => true,
            // Forced removal after a graceful stop failed
            (Stopping, Stopped) | (Stopping, Deleted) => true,
            (Stopped, Running) | (Stopped, Deleted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal session attached to a running workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalSession {
    pub id: Uuid,
    pub url: String,
    pub opened_at: DateTime<Utc>,
}

/// Workspace descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub owner_id: String,
    pub name: String,
    pub tier: Tier,
    pub state: WorkspaceState,
    pub container: Option<ContainerRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminal: Option<TerminalSession>,
}

impl Workspace {
    /// A freshly requested workspace with a new id
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>, tier: Tier) -> Self {
        let now = Utc::now();
        Self {
            id: WorkspaceId::new(),
            owner_id: owner_id.into(),
            name: name.into(),
            tier,
            state: WorkspaceState::Requested,
            container: None,
            created_at: now,
            updated_at: now,
            terminal: None,
        }
    }

    /// Move to `next`, rejecting edges the state machine does not have
    pub fn transition(&mut self, next: WorkspaceState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(WorkspaceError::Conflict(format!(
                "workspace {} cannot go from {} to {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        if next != WorkspaceState::Running {
            self.terminal = None;
        }
        Ok(())
    }
}

struct Slot {
    lock: Arc<Mutex<()>>,
    snapshot: RwLock<Workspace>,
    removed: AtomicBool,
}

impl Slot {
    fn new(workspace: Workspace) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            snapshot: RwLock::new(workspace),
            removed: AtomicBool::new(false),
        }
    }
}

type Slots = DashMap<WorkspaceId, Arc<Slot>>;

/// Exclusive access to one workspace.
///
/// Changes go to a private copy and become visible only on [`commit`].
/// Dropping the guard releases the lock and discards uncommitted changes.
///
/// [`commit`]: WorkspaceGuard::commit
pub struct WorkspaceGuard {
    working: Workspace,
    slot: Arc<Slot>,
    slots: Arc<Slots>,
    _permit: OwnedMutexGuard<()>,
}

impl WorkspaceGuard {
    /// Publish the working copy to readers
    pub fn commit(&mut self) {
        *self.slot.snapshot.write() = self.working.clone();
    }

    /// Unlink the workspace; waiters queued on the lock observe `NotFound`
    pub fn remove(self) -> Workspace {
        self.slot.removed.store(true, Ordering::Release);
        let id = self.working.id;
        self.slots.remove_if(&id, |_, slot| Arc::ptr_eq(slot, &self.slot));
        debug!(workspace_id = %id, "Removed workspace from registry");
        self.working
    }
}

impl Deref for WorkspaceGuard {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.working
    }
}

impl DerefMut for WorkspaceGuard {
    fn deref_mut(&mut self) -> &mut Workspace {
        &mut self.working
    }
}

/// Thread-safe workspace map with per-id serialization
#[derive(Clone)]
pub struct WorkspaceRegistry {
    slots: Arc<Slots>,
    lock_timeout: Duration,
}

impl WorkspaceRegistry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            lock_timeout,
        }
    }

    /// Register a new workspace. Fails with `Conflict` if the id is taken.
    pub fn insert(&self, workspace: Workspace) -> Result<()> {
        match self.slots.entry(workspace.id) {
            Entry::Occupied(_) => Err(WorkspaceError::Conflict(format!(
                "workspace {} already registered",
                workspace.id
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Slot::new(workspace)));
                Ok(())
            }
        }
    }

    /// Last committed snapshot of a workspace
    pub fn get(&self, id: &WorkspaceId) -> Option<Workspace> {
        self.slots.get(id).map(|slot| slot.snapshot.read().clone())
    }

    /// Snapshots of an owner's workspaces, newest first
    pub fn list(&self, owner_id: &str) -> Vec<Workspace> {
        let mut workspaces: Vec<Workspace> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let snapshot = entry.value().snapshot.read();
                (snapshot.owner_id == owner_id).then(|| snapshot.clone())
            })
            .collect();
        workspaces.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        workspaces
    }

    /// Ids of workspaces with an attached terminal session
    pub fn with_terminal(&self) -> Vec<WorkspaceId> {
        self.slots
            .iter()
            .filter(|entry| entry.value().snapshot.read().terminal.is_some())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Acquire the per-id lock.
    ///
    /// Waits at most the configured lock timeout (`Conflict` on expiry).
    /// A workspace removed while this call waited yields `NotFound`.
    pub async fn lock(&self, id: WorkspaceId) -> Result<WorkspaceGuard> {
        let slot = self
            .slots
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;

        let permit = tokio::time::timeout(self.lock_timeout, Arc::clone(&slot.lock).lock_owned())
            .await
            .map_err(|_| {
                WorkspaceError::Conflict(format!(
                    "workspace {} is busy with another operation",
                    id
                ))
            })?;

        if slot.removed.load(Ordering::Acquire) {
            return Err(WorkspaceError::NotFound(id.to_string()));
        }

        let working = slot.snapshot.read().clone();
        Ok(WorkspaceGuard {
            working,
            slot,
            slots: Arc::clone(&self.slots),
            _permit: permit,
        })
    }

    /// Run `f` while holding the lock for `id`.
    ///
    /// The guard moves into `f` and is released when its future finishes,
    /// whether it succeeds or fails.
    pub async fn with_lock<F, Fut, T>(&self, id: WorkspaceId, f: F) -> Result<T>
    where
        F: FnOnce(WorkspaceGuard) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.lock(id).await?;
        f(guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn registry() -> WorkspaceRegistry {
        WorkspaceRegistry::new(Duration::from_secs(5))
    }

    fn running(owner: &str, name: &str) -> Workspace {
        let mut ws = Workspace::new(owner, name, Tier::Free);
        ws.transition(WorkspaceState::Provisioning).unwrap();
        ws.transition(WorkspaceState::Running).unwrap();
        ws.container = Some(ContainerRef::new(format!("ctr-{}", name)));
        ws
    }

    #[test]
    fn test_state_machine_edges() {
        use WorkspaceState::*;
        assert!(Requested.can_transition_to(Provisioning));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopped.can_transition_to(Running));
        assert!(Stopped.can_transition_to(Deleted));
        assert!(Stopping.can_transition_to(Deleted));
        assert!(Provisioning.can_transition_to(Failed));

        assert!(!Requested.can_transition_to(Running));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Deleted.can_transition_to(Failed));
        assert!(Failed.is_terminal() && Deleted.is_terminal());
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let mut ws = Workspace::new("u1", "demo", Tier::Free);
        let err = ws.transition(WorkspaceState::Stopped).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(ws.state, WorkspaceState::Requested);
    }

    #[test]
    fn test_leaving_running_drops_terminal() {
        let mut ws = running("u1", "demo");
        ws.terminal = Some(TerminalSession {
            id: Uuid::new_v4(),
            url: "http://localhost/terminal/x".to_string(),
            opened_at: Utc::now(),
        });
        ws.transition(WorkspaceState::Stopping).unwrap();
        assert!(ws.terminal.is_none());
    }

    #[test]
    fn test_with_terminal_lists_only_attached_workspaces() {
        let registry = registry();
        let mut attached = running("u1", "attached");
        attached.terminal = Some(TerminalSession {
            id: Uuid::new_v4(),
            url: "http://localhost/terminal/x".to_string(),
            opened_at: Utc::now(),
        });
        let id = attached.id;
        registry.insert(attached).unwrap();
        registry.insert(running("u1", "plain")).unwrap();

        assert_eq!(registry.with_terminal(), vec![id]);
    }

    #[test]
    fn test_workspace_id_parsing() {
        let id = WorkspaceId::new();
        assert_eq!(id.to_string().parse::<WorkspaceId>().unwrap(), id);
        let err = "not-a-uuid".parse::<WorkspaceId>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let registry = registry();
        let ws = running("u1", "demo");
        registry.insert(ws.clone()).unwrap();
        let err = registry.insert(ws).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_publishes_and_drop_discards() {
        let registry = registry();
        let ws = running("u1", "demo");
        let id = ws.id;
        registry.insert(ws).unwrap();

        {
            let mut guard = registry.lock(id).await.unwrap();
            guard.name = "renamed".to_string();
            // Not visible until committed.
            assert_eq!(registry.get(&id).unwrap().name, "demo");
            guard.commit();
        }
        assert_eq!(registry.get(&id).unwrap().name, "renamed");

        {
            let mut guard = registry.lock(id).await.unwrap();
            guard.name = "discarded".to_string();
        }
        assert_eq!(registry.get(&id).unwrap().name, "renamed");
    }

    #[tokio::test]
    async fn test_lock_missing_id_is_not_found() {
        let registry = registry();
        let err = registry.lock(WorkspaceId::new()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_waiter_on_removed_workspace_sees_not_found() {
        let registry = registry();
        let ws = running("u1", "demo");
        let id = ws.id;
        registry.insert(ws).unwrap();

        let guard = registry.lock(id).await.unwrap();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock(id).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        guard.remove();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_lock_timeout_is_conflict() {
        let registry = WorkspaceRegistry::new(Duration::from_millis(30));
        let ws = running("u1", "demo");
        let id = ws.id;
        registry.insert(ws).unwrap();

        let _held = registry.lock(id).await.unwrap();
        let err = registry.lock(id).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let registry = registry();
        let ws = running("u1", "demo");
        let id = ws.id;
        registry.insert(ws).unwrap();

        let result: Result<()> = registry
            .with_lock(id, |_guard| async {
                Err(WorkspaceError::Provisioning("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        // Lock was released; this would otherwise time out.
        let name = registry
            .with_lock(id, |guard| async move { Ok(guard.name.clone()) })
            .await
            .unwrap();
        assert_eq!(name, "demo");
    }

    #[tokio::test]
    async fn test_list_does_not_block_on_held_lock() {
        let registry = registry();
        let a = running("u1", "a");
        let id = a.id;
        registry.insert(a).unwrap();
        registry.insert(running("u2", "other")).unwrap();

        let _held = registry.lock(id).await.unwrap();
        let listed = tokio::time::timeout(Duration::from_millis(100), async {
            registry.list("u1")
        })
        .await
        .expect("list must not wait on a workspace lock");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a");
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let registry = registry();
        let mut older = running("u1", "older");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        registry.insert(older).unwrap();
        registry.insert(running("u1", "newer")).unwrap();

        let names: Vec<_> = registry.list("u1").into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["newer".to_string(), "older".to_string()]);
    }

    #[tokio::test]
    async fn test_unrelated_workspaces_lock_independently() {
        let registry = WorkspaceRegistry::new(Duration::from_millis(50));
        let a = running("u1", "a");
        let b = running("u1", "b");
        let (id_a, id_b) = (a.id, b.id);
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();

        let _held_a = registry.lock(id_a).await.unwrap();
        let guard_b = registry.lock(id_b).await;
        assert!(guard_b.is_ok());
    }

    #[tokio::test]
    async fn test_lock_order_serializes_mutations() {
        let registry = registry();
        let ws = running("u1", "counter");
        let id = ws.id;
        registry.insert(ws).unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .with_lock(id, |mut guard| async move {
                            let next = guard.name.len() + 1;
                            tokio::task::yield_now().await;
                            guard.name = "x".repeat(next);
                            guard.commit();
                            Ok(())
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // "counter" (7) plus one char per serialized update
        assert_eq!(registry.get(&id).unwrap().name.len(), 27);
    }
}
