//! Tier policy
//!
//! Maps a subscription tier to the resource ceilings and security profile a
//! workspace container is created with. The set of tiers is closed: an
//! unknown tier string is a caller bug and is rejected, never defaulted.

use crate::error::WorkspaceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use workspace_runtime::{PidNamespace, UserMapping};

pub const MIB: i64 = 1024 * 1024;
pub const GIB: i64 = 1024 * MIB;

/// Capability names always dropped
pub const CAP_DROP_ALL: &str = "ALL";

/// The only capabilities a workspace container may hold
pub const CAPABILITY_ALLOW_LIST: [&str; 4] = ["NET_BIND_SERVICE", "CHOWN", "SETUID", "SETGID"];

/// Default pre-installed AppArmor profile for workspace containers
pub const DEFAULT_CONFINEMENT_PROFILE: &str = "workspace-container-profile";

/// Default isolated network for workspace containers
pub const DEFAULT_NETWORK: &str = "workspace-net";

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    fn index(self) -> usize {
        match self {
            Tier::Free => 0,
            Tier::Pro => 1,
            Tier::Enterprise => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(WorkspaceError::UnknownTier(s.to_string())),
        }
    }
}

/// Resource ceilings for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub tier: Tier,
    /// Memory ceiling in bytes
    pub memory_limit_bytes: i64,
    /// Fraction of one core
    pub cpu_quota: f64,
    /// Admission allowance per sliding window
    pub requests_per_minute: u32,
    pub pids_limit: i64,
    /// Storage quota in bytes (recorded on the container)
    pub storage_bytes: i64,
}

/// Security constraints for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub confinement_profile: String,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub network: String,
    pub user: UserMapping,
    pub read_only_root: bool,
    pub pid_namespace: PidNamespace,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            confinement_profile: DEFAULT_CONFINEMENT_PROFILE.to_string(),
            cap_drop: vec![CAP_DROP_ALL.to_string()],
            cap_add: CAPABILITY_ALLOW_LIST.iter().map(|c| c.to_string()).collect(),
            network: DEFAULT_NETWORK.to_string(),
            user: UserMapping {
                uid: 1000,
                gid: 1000,
            },
            read_only_root: false,
            pid_namespace: PidNamespace::Private,
        }
    }
}

/// Configured policy for a single tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub resources: ResourceProfile,
    #[serde(default)]
    pub security: SecurityProfile,
}

/// Policy table covering every tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub free: TierPolicy,
    pub pro: TierPolicy,
    pub enterprise: TierPolicy,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            free: TierPolicy {
                resources: ResourceProfile {
                    tier: Tier::Free,
                    memory_limit_bytes: 512 * MIB,
                    cpu_quota: 0.5,
                    requests_per_minute: 60,
                    pids_limit: 256,
                    storage_bytes: 5 * GIB,
                },
                security: SecurityProfile::default(),
            },
            pro: TierPolicy {
                resources: ResourceProfile {
                    tier: Tier::Pro,
                    memory_limit_bytes: 2 * GIB,
                    cpu_quota: 2.0,
                    requests_per_minute: 300,
                    pids_limit: 512,
                    storage_bytes: 50 * GIB,
                },
                security: SecurityProfile::default(),
            },
            enterprise: TierPolicy {
                resources: ResourceProfile {
                    tier: Tier::Enterprise,
                    memory_limit_bytes: 8 * GIB,
                    cpu_quota: 4.0,
                    requests_per_minute: 1000,
                    pids_limit: 1024,
                    storage_bytes: 100 * GIB,
                },
                security: SecurityProfile::default(),
            },
        }
    }
}

impl TierTable {
    pub fn get(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Free => &self.free,
            Tier::Pro => &self.pro,
            Tier::Enterprise => &self.enterprise,
        }
    }

    /// Distinct networks referenced by any tier
    pub fn networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = Tier::ALL
            .iter()
            .map(|t| self.get(*t).security.network.clone())
            .collect();
        networks.sort();
        networks.dedup();
        networks
    }
}

#[derive(Debug, Clone)]
struct ResolvedTier {
    resources: Arc<ResourceProfile>,
    security: Arc<SecurityProfile>,
}

/// Pure lookup from tier to its immutable profiles.
///
/// Built once at startup; profiles are shared, never copied per request.
#[derive(Debug, Clone)]
pub struct TierPolicyResolver {
    tiers: [ResolvedTier; 3],
}

impl TierPolicyResolver {
    pub fn new(table: &TierTable) -> Self {
        let resolved = |tier: Tier| {
            let policy = table.get(tier);
            ResolvedTier {
                resources: Arc::new(policy.resources.clone()),
                security: Arc::new(policy.security.clone()),
            }
        };
        Self {
            tiers: [
                resolved(Tier::Free),
                resolved(Tier::Pro),
                resolved(Tier::Enterprise),
            ],
        }
    }

    /// Resolve a tier string. Unknown tiers fail with `UnknownTier`.
    pub fn resolve(
        &self,
        tier: &str,
    ) -> Result<(Arc<ResourceProfile>, Arc<SecurityProfile>), WorkspaceError> {
        let tier: Tier = tier.parse()?;
        Ok(self.resolve_tier(tier))
    }

    pub fn resolve_tier(&self, tier: Tier) -> (Arc<ResourceProfile>, Arc<SecurityProfile>) {
        let resolved = &self.tiers[tier.index()];
        (resolved.resources.clone(), resolved.security.clone())
    }

    pub fn rate_limit(&self, tier: Tier) -> u32 {
        self.tiers[tier.index()].resources.requests_per_minute
    }
}

impl Default for TierPolicyResolver {
    fn default() -> Self {
        Self::new(&TierTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_resolve_matches_tier_table() {
        let resolver = TierPolicyResolver::default();

        let expected = [
            ("free", 512 * MIB, 0.5, 60),
            ("pro", 2 * GIB, 2.0, 300),
            ("enterprise", 8 * GIB, 4.0, 1000),
        ];

        for (name, memory, cpu, rpm) in expected {
            let (resources, _) = resolver.resolve(name).expect("known tier");
            assert_eq!(resources.memory_limit_bytes, memory, "{name} memory");
            assert_eq!(resources.cpu_quota, cpu, "{name} cpu");
            assert_eq!(resources.requests_per_minute, rpm, "{name} rate limit");
            assert_eq!(resources.tier.as_str(), name);
        }
    }

    #[test]
    fn test_unknown_tier_is_rejected() {
        let resolver = TierPolicyResolver::default();
        let err = resolver.resolve("bogus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTier);
        assert!(resolver.resolve("").is_err());
    }

    #[test]
    fn test_tier_parsing_is_case_insensitive() {
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert_eq!(" enterprise ".parse::<Tier>().unwrap(), Tier::Enterprise);
        assert!("free-trial".parse::<Tier>().is_err());
    }

    #[test]
    fn test_profiles_are_shared_between_calls() {
        let resolver = TierPolicyResolver::default();
        let (first, _) = resolver.resolve_tier(Tier::Pro);
        let (second, _) = resolver.resolve_tier(Tier::Pro);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_default_security_profile_is_minimal() {
        let profile = SecurityProfile::default();
        assert_eq!(profile.cap_drop, vec!["ALL".to_string()]);
        assert_eq!(profile.cap_add.len(), CAPABILITY_ALLOW_LIST.len());
        assert!(!profile.user.is_root());
        assert_eq!(profile.pid_namespace, PidNamespace::Private);
    }

    #[test]
    fn test_table_networks_are_deduplicated() {
        let mut table = TierTable::default();
        assert_eq!(table.networks(), vec![DEFAULT_NETWORK.to_string()]);

        table.enterprise.security.network = "enterprise-net".to_string();
        assert_eq!(
            table.networks(),
            vec!["enterprise-net".to_string(), DEFAULT_NETWORK.to_string()]
        );
    }

    #[test]
    fn test_tier_table_deserializes_without_security_section() {
        let json = serde_json::json!({
            "free": {"resources": {"tier": "free", "memory_limit_bytes": 1, "cpu_quota": 0.25,
                     "requests_per_minute": 10, "pids_limit": 64, "storage_bytes": 1}},
            "pro": {"resources": {"tier": "pro", "memory_limit_bytes": 2, "cpu_quota": 1.0,
                    "requests_per_minute": 20, "pids_limit": 64, "storage_bytes": 1}},
            "enterprise": {"resources": {"tier": "enterprise", "memory_limit_bytes": 3, "cpu_quota": 2.0,
                           "requests_per_minute": 30, "pids_limit": 64, "storage_bytes": 1}}
        });
        let table: TierTable = serde_json::from_value(json).expect("deserialize");
        assert_eq!(table.free.security, SecurityProfile::default());

        let resolver = TierPolicyResolver::new(&table);
        assert_eq!(resolver.rate_limit(Tier::Free), 10);
        assert_eq!(resolver.rate_limit(Tier::Enterprise), 30);
    }
}
