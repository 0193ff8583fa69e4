//! Security isolation enforcer
//!
//! Turns a tier's [`SecurityProfile`] into the concrete directives a
//! container is created with, refusing anything that would weaken tenant
//! isolation. The capability add-list is always the fixed allow-list; it is
//! never taken from the profile or from caller input.

use crate::error::{Result, WorkspaceError};
use crate::registry::WorkspaceId;
use crate::tier::{SecurityProfile, CAPABILITY_ALLOW_LIST, CAP_DROP_ALL};
use std::collections::HashMap;
use tracing::{debug, warn};
use workspace_runtime::{labels, ContainerRuntime, PidNamespace, RuntimeSecuritySpec};

/// Network modes that share a namespace with the host or with other tenants
const FORBIDDEN_NETWORKS: &[&str] = &["host", "bridge", "default", "none"];

pub struct IsolationEnforcer;

impl IsolationEnforcer {
    /// Validate `profile` and produce the runtime security spec for one workspace
    pub fn build(
        profile: &SecurityProfile,
        workspace_id: &WorkspaceId,
        owner_id: &str,
    ) -> Result<RuntimeSecuritySpec> {
        Self::validate(profile)?;

        let mut spec_labels = HashMap::new();
        spec_labels.insert(labels::WORKSPACE_ID.to_string(), workspace_id.to_string());
        spec_labels.insert(labels::OWNER_ID.to_string(), owner_id.to_string());

        Ok(RuntimeSecuritySpec {
            confinement_profile: profile.confinement_profile.clone(),
            cap_drop: vec![CAP_DROP_ALL.to_string()],
            cap_add: CAPABILITY_ALLOW_LIST.iter().map(|c| c.to_string()).collect(),
            network: profile.network.clone(),
            user: profile.user,
            read_only_root: profile.read_only_root,
            pid_namespace: PidNamespace::Private,
            no_new_privileges: true,
            labels: spec_labels,
        })
    }

    fn validate(profile: &SecurityProfile) -> Result<()> {
        let violation = |msg: String| Err(WorkspaceError::SecurityPolicy(msg));

        if profile.confinement_profile.trim().is_empty() {
            return violation("confinement profile name is empty".to_string());
        }

        if !profile.cap_drop.iter().any(|c| c == CAP_DROP_ALL) {
            return violation("capability drop set must contain ALL".to_string());
        }

        if let Some(cap) = profile
            .cap_add
            .iter()
            .find(|c| !CAPABILITY_ALLOW_LIST.contains(&c.as_str()))
        {
            return violation(format!("capability {} is not allowed", cap));
        }

        let network = profile.network.trim();
        if network.is_empty()
            || FORBIDDEN_NETWORKS.contains(&network.to_ascii_lowercase().as_str())
            || network.starts_with("container:")
        {
            return violation(format!(
                "network '{}' is not an isolated workspace network",
                profile.network
            ));
        }

        if profile.user.is_root() {
            return violation(format!("user mapping {} maps to root", profile.user));
        }

        if profile.pid_namespace == PidNamespace::Host {
            return violation("host PID namespace is not allowed".to_string());
        }

        Ok(())
    }

    /// Confirm the runtime has the confinement profile loaded.
    ///
    /// Fails closed: a missing profile or a runtime that cannot answer both
    /// yield `SecurityPolicy`.
    pub async fn verify(runtime: &dyn ContainerRuntime, spec: &RuntimeSecuritySpec) -> Result<()> {
        match runtime
            .confinement_profile_loaded(&spec.confinement_profile)
            .await
        {
            Ok(true) => {
                debug!(profile = %spec.confinement_profile, "Confinement profile is loaded");
                Ok(())
            }
            Ok(false) => {
                warn!(profile = %spec.confinement_profile, "Confinement profile is not loaded");
                Err(WorkspaceError::SecurityPolicy(format!(
                    "confinement profile {} is not loaded",
                    spec.confinement_profile
                )))
            }
            Err(e) => {
                warn!(profile = %spec.confinement_profile, error = %e, "Could not resolve confinement profile");
                Err(WorkspaceError::SecurityPolicy(format!(
                    "confinement profile {} could not be resolved: {}",
                    spec.confinement_profile, e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::FakeRuntime;
    use workspace_runtime::UserMapping;

    fn build(profile: &SecurityProfile) -> Result<RuntimeSecuritySpec> {
        IsolationEnforcer::build(profile, &WorkspaceId::new(), "u1")
    }

    fn assert_violation(profile: SecurityProfile) {
        let err = build(&profile).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityPolicyError, "{:?}", profile);
    }

    #[test]
    fn test_default_profile_builds_minimal_spec() {
        let id = WorkspaceId::new();
        let spec = IsolationEnforcer::build(&SecurityProfile::default(), &id, "u1").unwrap();

        assert_eq!(spec.cap_drop, vec!["ALL".to_string()]);
        assert_eq!(spec.cap_add, CAPABILITY_ALLOW_LIST.map(String::from).to_vec());
        assert!(spec.no_new_privileges);
        assert_eq!(spec.pid_namespace, PidNamespace::Private);
        assert_eq!(spec.labels.get(labels::WORKSPACE_ID), Some(&id.to_string()));
        assert_eq!(spec.labels.get(labels::OWNER_ID).map(String::as_str), Some("u1"));
    }

    #[test]
    fn test_add_list_is_fixed_even_when_profile_is_narrower() {
        let profile = SecurityProfile {
            cap_add: vec!["CHOWN".to_string()],
            ..Default::default()
        };
        let spec = build(&profile).unwrap();
        assert_eq!(spec.cap_add.len(), CAPABILITY_ALLOW_LIST.len());
    }

    #[test]
    fn test_rejects_missing_drop_all() {
        assert_violation(SecurityProfile {
            cap_drop: vec!["NET_RAW".to_string()],
            ..Default::default()
        });
    }

    #[test]
    fn test_rejects_capability_outside_allow_list() {
        assert_violation(SecurityProfile {
            cap_add: vec!["SYS_ADMIN".to_string()],
            ..Default::default()
        });
    }

    #[test]
    fn test_rejects_shared_networks() {
        for network in ["host", "bridge", "HOST", "default", "none", "container:abc", " "] {
            assert_violation(SecurityProfile {
                network: network.to_string(),
                ..Default::default()
            });
        }
    }

    #[test]
    fn test_rejects_root_user_and_host_pid() {
        assert_violation(SecurityProfile {
            user: UserMapping { uid: 0, gid: 1000 },
            ..Default::default()
        });
        assert_violation(SecurityProfile {
            pid_namespace: PidNamespace::Host,
            ..Default::default()
        });
        assert_violation(SecurityProfile {
            confinement_profile: String::new(),
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn test_verify_fails_closed() {
        let spec = build(&SecurityProfile::default()).unwrap();

        let runtime = FakeRuntime::new();
        assert!(IsolationEnforcer::verify(&runtime, &spec).await.is_ok());

        let runtime = FakeRuntime::new().without_profiles();
        let err = IsolationEnforcer::verify(&runtime, &spec).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityPolicyError);

        let runtime = FakeRuntime::new();
        runtime.fail_on("profile");
        let err = IsolationEnforcer::verify(&runtime, &spec).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SecurityPolicyError);
    }
}
