//! Audit trail and derived audit view

use crate::registry::{Workspace, WorkspaceId};
use crate::tier::{ResourceProfile, SecurityProfile};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use workspace_runtime::{ContainerRef, RuntimeSecuritySpec};

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkspaceCreate,
    WorkspaceStart,
    WorkspaceStop,
    WorkspaceRemove,
    TerminalOpen,
    TerminalClose,
    WorkspaceExec,
    PolicyViolation,
}

/// One recorded lifecycle action. Never carries secrets or command lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,

    pub action: AuditAction,

    pub workspace_id: WorkspaceId,

    pub owner_id: String,

    /// Container reference (if one existed)
    pub container: Option<ContainerRef>,

    pub success: bool,

    /// Error message (if failed)
    pub error: Option<String>,
}

/// Bounded in-memory audit log; the oldest entries are dropped first
pub struct AuditTrail {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn for_workspace(&self, id: &WorkspaceId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| &e.workspace_id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Read-only view combining a workspace with the policy applied to it.
///
/// Always recomputed from the registry and the tier table, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditState {
    pub workspace: Workspace,
    pub resources: ResourceProfile,
    pub security: SecurityProfile,
    pub runtime_security: RuntimeSecuritySpec,
    /// Recorded actions on this workspace, oldest first
    pub history: Vec<AuditEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: AuditAction, workspace_id: WorkspaceId) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            action,
            workspace_id,
            owner_id: "u1".to_string(),
            container: None,
            success: true,
            error: None,
        }
    }

    #[test]
    fn test_trail_is_bounded_and_drops_oldest() {
        let trail = AuditTrail::new(3);
        let ids: Vec<_> = (0..5).map(|_| WorkspaceId::new()).collect();
        for id in &ids {
            trail.record(entry(AuditAction::WorkspaceCreate, *id));
        }

        assert_eq!(trail.len(), 3);
        let kept: Vec<_> = trail.entries().iter().map(|e| e.workspace_id).collect();
        assert_eq!(kept, ids[2..].to_vec());
    }

    #[test]
    fn test_filter_by_workspace() {
        let trail = AuditTrail::new(10);
        let a = WorkspaceId::new();
        let b = WorkspaceId::new();
        trail.record(entry(AuditAction::WorkspaceCreate, a));
        trail.record(entry(AuditAction::WorkspaceCreate, b));
        trail.record(entry(AuditAction::WorkspaceStop, a));

        let actions: Vec<_> = trail.for_workspace(&a).iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::WorkspaceCreate, AuditAction::WorkspaceStop]
        );
    }

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&AuditAction::TerminalOpen).unwrap();
        assert_eq!(json, "\"terminal_open\"");
    }
}
