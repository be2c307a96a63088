use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::ConfigSummary;
use crate::decision::Verdict;

/// Lock-free decision counters owned by the coordinator.
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    total: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    rate_limited: AtomicU64,
    escalations: AtomicU64,
    identities_seen: AtomicU64,
}

impl Statistics {
    pub(crate) fn observe(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Called when per-identity state is created for an identity.
    pub(crate) fn identity_tracked(&self) {
        self.identities_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count(&self, verdict: Verdict) {
        let counter = match verdict {
            Verdict::Allowed | Verdict::Whitelisted => &self.allowed,
            Verdict::Blocked | Verdict::SuspiciousPattern | Verdict::Escalated => &self.blocked,
            Verdict::EndpointLimited | Verdict::RateLimited | Verdict::GlobalRateLimited => {
                &self.rate_limited
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn escalated(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DecisionCounters {
        DecisionCounters {
            total_requests: self.total.load(Ordering::Relaxed),
            allowed_count: self.allowed.load(Ordering::Relaxed),
            blocked_count: self.blocked.load(Ordering::Relaxed),
            rate_limited_count: self.rate_limited.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            unique_identities: self.identities_seen.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DecisionCounters {
    pub total_requests: u64,
    pub allowed_count: u64,
    pub blocked_count: u64,
    pub rate_limited_count: u64,
    pub escalations: u64,
    pub unique_identities: u64,
}

/// Point-in-time engine statistics for the operations surface.
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct AdmissionStats {
    pub total_requests: u64,
    pub allowed_count: u64,
    /// Denials caused by the blocklist or by a fresh escalation.
    pub blocked_count: u64,
    /// Denials caused by resource quotas or token buckets.
    pub rate_limited_count: u64,
    /// Identities that entered tracking. An identity whose state was
    /// reclaimed or reset is counted again when it returns; whitelisted
    /// identities are never tracked.
    pub unique_identities: u64,
    pub currently_blocked_count: u64,
    /// Identities moved to the blocklist since startup.
    pub escalations: u64,
    pub active_buckets: u64,
    pub tracked_histories: u64,
    pub config: ConfigSummary,
}
