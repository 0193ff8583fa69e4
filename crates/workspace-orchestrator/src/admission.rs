//! Admission control for the workspace API.
//!
//! A per-client sliding-window limiter: each client keeps the timestamps of
//! its admitted requests within the trailing window, and a request is
//! admitted iff fewer than the tier's limit remain after pruning. Rejected
//! requests are not recorded, so a rejected burst never extends the
//! client's lockout.
//!
//! # Memory Management
//!
//! Buckets live in a sharded map. Buckets idle for longer than the TTL are
//! evicted every `cleanup_interval` admissions and by the periodic task
//! started with [`AdmissionController::spawn_evictor`].

use crate::config::humantime_serde;
use crate::config::ConfigError;
use crate::error::WorkspaceError;
use crate::tier::{Tier, TierPolicyResolver};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for the admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Size of the sliding window
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Buckets without activity for this long are evicted
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,

    /// Period of the background eviction task
    #[serde(with = "humantime_serde")]
    pub eviction_interval: Duration,

    /// Run eviction inline every N admissions
    pub cleanup_interval: u64,

    /// Paths that bypass admission entirely
    pub exempt_paths: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(600),
            eviction_interval: Duration::from_secs(60),
            cleanup_interval: 1000,
            exempt_paths: [
                "/health",
                "/ready",
                "/docs",
                "/openapi.json",
                "/api/docs",
                "/api/openapi.json",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::Invalid {
                field: "admission.window".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.idle_ttl < self.window {
            return Err(ConfigError::Invalid {
                field: "admission.idle_ttl".to_string(),
                reason: "must not be shorter than the window".to_string(),
            });
        }
        if self.cleanup_interval == 0 || self.eviction_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "admission.cleanup_interval".to_string(),
                reason: "eviction must be enabled".to_string(),
            });
        }
        Ok(())
    }
}

/// Rate-limit state reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the oldest counted request leaves the window
    pub reset_after_secs: u64,
    /// Unix timestamp of the same moment
    pub reset_at: i64,
}

impl RateLimitStatus {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.to_string()),
        ]
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Path is not subject to limiting
    Exempt,
    Allow(RateLimitStatus),
    Reject {
        retry_after_secs: u64,
        status: RateLimitStatus,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Reject { .. })
    }

    pub fn status(&self) -> Option<&RateLimitStatus> {
        match self {
            Admission::Exempt => None,
            Admission::Allow(status) | Admission::Reject { status, .. } => Some(status),
        }
    }

    /// Observability headers; rejections also carry `Retry-After`
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = self.status().map(|s| s.headers()).unwrap_or_default();
        if let Admission::Reject {
            retry_after_secs, ..
        } = self
        {
            headers.push(("Retry-After", retry_after_secs.to_string()));
        }
        headers
    }

    /// Convert a rejection into `RateLimitExceeded`
    pub fn into_result(self) -> Result<Option<RateLimitStatus>, WorkspaceError> {
        match self {
            Admission::Exempt => Ok(None),
            Admission::Allow(status) => Ok(Some(status)),
            Admission::Reject {
                retry_after_secs,
                status,
            } => Err(WorkspaceError::RateLimitExceeded {
                limit: status.limit,
                retry_after_secs,
            }),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    hits: VecDeque<Instant>,
    last_seen: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self {
            hits: VecDeque::new(),
            last_seen: now,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Tier-aware sliding-window admission controller
pub struct AdmissionController {
    config: AdmissionConfig,
    tiers: Arc<TierPolicyResolver>,
    buckets: DashMap<String, Bucket>,
    request_count: AtomicU64,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig, tiers: Arc<TierPolicyResolver>) -> Self {
        Self {
            config,
            tiers,
            buckets: DashMap::new(),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.config.exempt_paths.iter().any(|p| p == path)
    }

    /// Check a request for `path`; exempt paths are never counted
    pub fn check(&self, path: &str, client_id: &str, tier: Tier) -> Admission {
        if self.is_exempt(path) {
            return Admission::Exempt;
        }
        self.admit(client_id, tier)
    }

    pub fn admit(&self, client_id: &str, tier: Tier) -> Admission {
        self.admit_at(client_id, tier, Instant::now())
    }

    /// Admission decision as of `now`
    pub fn admit_at(&self, client_id: &str, tier: Tier, now: Instant) -> Admission {
        let limit = self.tiers.rate_limit(tier);
        let window = self.config.window;

        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % self.config.cleanup_interval == 0 {
            let evicted = self.evict_stale_at(now);
            debug!(request_count = count, evicted, "Ran inline bucket eviction");
        }

        // The entry guard holds only this key's shard.
        let mut bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| Bucket::new(now));
        bucket.prune(now, window);
        bucket.last_seen = now;

        let used = bucket.hits.len();
        if used < limit as usize {
            bucket.hits.push_back(now);
            let status = Self::status(&bucket, limit, now, window);
            return Admission::Allow(status);
        }

        // Slot frees up when the request `limit` positions from the back expires.
        let blocking = bucket.hits[used - limit as usize];
        let wait = (blocking + window).saturating_duration_since(now);
        let retry_after_secs = ceil_secs(wait).clamp(1, ceil_secs(window).max(1));
        let status = Self::status(&bucket, limit, now, window);
        drop(bucket);

        warn!(
            client_id = %client_id,
            tier = %tier,
            limit,
            retry_after_secs,
            "Rate limit exceeded"
        );

        Admission::Reject {
            retry_after_secs,
            status,
        }
    }

    fn status(bucket: &Bucket, limit: u32, now: Instant, window: Duration) -> RateLimitStatus {
        let used = bucket.hits.len() as u32;
        let reset_after = bucket
            .hits
            .front()
            .map(|oldest| (*oldest + window).saturating_duration_since(now))
            .unwrap_or(window);
        let reset_after_secs = ceil_secs(reset_after);
        RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(used),
            reset_after_secs,
            reset_at: chrono::Utc::now().timestamp() + reset_after_secs as i64,
        }
    }

    /// Evict buckets idle for longer than the TTL
    pub fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now())
    }

    pub fn evict_stale_at(&self, now: Instant) -> usize {
        let ttl = self.config.idle_ttl;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) < ttl);
        before.saturating_sub(self.buckets.len())
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    /// Periodically evict stale buckets until the task is aborted
    pub fn spawn_evictor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = controller.config.eviction_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = controller.evict_stale();
                if evicted > 0 {
                    debug!(
                        evicted,
                        tracked = controller.tracked_clients(),
                        "Evicted idle rate-limit buckets"
                    );
                }
            }
        })
    }
}
