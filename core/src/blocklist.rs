use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::saturating_add;

/// Why an identity was escalated to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    BurstPattern,
    SlowDripPattern,
    ScanPattern,
    ExcessiveVolume,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::BurstPattern => "burst_pattern",
            BlockReason::SlowDripPattern => "slow_drip_pattern",
            BlockReason::ScanPattern => "scan_pattern",
            BlockReason::ExcessiveVolume => "excessive_volume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub blocked_until: DateTime<Utc>,
    pub reason: BlockReason,
}

/// Time-bounded denial list keyed by identity.
#[derive(Debug, Default)]
pub struct Blocklist {
    entries: DashMap<String, BlockEntry>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active block for `identity`, purging it first if it has expired.
    pub fn active(&self, identity: &str, now: DateTime<Utc>) -> Option<BlockEntry> {
        if let Some(entry) = self.entries.get(identity) {
            if now < entry.blocked_until {
                return Some(entry.clone());
            }
        } else {
            return None;
        }
        // Re-check under the write lock: another caller may have re-blocked.
        self.entries
            .remove_if(identity, |_, entry| now >= entry.blocked_until);
        self.entries
            .get(identity)
            .filter(|entry| now < entry.blocked_until)
            .map(|entry| entry.clone())
    }

    /// Blocks `identity` for `duration`. An existing longer block is kept.
    pub fn block(
        &self,
        identity: &str,
        duration: ChronoDuration,
        reason: BlockReason,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let until = saturating_add(now, duration);
        match self.entries.entry(identity.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                if existing.blocked_until < until {
                    existing.blocked_until = until;
                    existing.reason = reason;
                }
                existing.blocked_until
            }
            Entry::Vacant(vacant) => {
                vacant.insert(BlockEntry {
                    blocked_until: until,
                    reason,
                });
                until
            }
        }
    }

    /// Manual release. Returns whether an entry was present.
    pub fn unblock(&self, identity: &str) -> bool {
        self.entries.remove(identity).is_some()
    }

    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| now >= entry.value().blocked_until)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn remove_if_expired(&self, identity: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .remove_if(identity, |_, entry| now >= entry.blocked_until)
            .is_some()
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .iter()
            .filter(|entry| now < entry.value().blocked_until)
            .count()
    }
}
