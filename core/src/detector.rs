use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::config::EngineConfig;
use crate::history::RequestHistory;

const BURST_WINDOW_SECS: i64 = 1;
const SLOW_DRIP_WINDOW_SECS: i64 = 60;
const SCAN_WINDOW_SECS: i64 = 10;

/// Which abuse heuristic tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackSignal {
    /// Flood: too many requests within one second.
    Burst,
    /// Resource exhaustion: sustained traffic to expensive resources.
    SlowDrip,
    /// Reconnaissance: many distinct resources within ten seconds.
    Scan,
}

impl AttackSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            AttackSignal::Burst => "burst",
            AttackSignal::SlowDrip => "slow_drip",
            AttackSignal::Scan => "scan",
        }
    }
}

/// Stateless abuse heuristics evaluated against an identity's request history.
///
/// The request being decided is counted along with the recorded history, so
/// the request that crosses a threshold is the one that trips detection.
#[derive(Debug, Clone, Copy)]
pub struct PatternDetector<'a> {
    config: &'a EngineConfig,
}

impl<'a> PatternDetector<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn detect(
        &self,
        history: Option<&RequestHistory>,
        resource: &str,
        now: DateTime<Utc>,
    ) -> Option<AttackSignal> {
        if !self.config.enable_pattern_detection {
            return None;
        }

        if self.is_burst(history, now) {
            return Some(AttackSignal::Burst);
        }
        if self.config.enable_slow_drip_detection && self.is_slow_drip(history, resource, now) {
            return Some(AttackSignal::SlowDrip);
        }
        if self.config.enable_scan_detection && self.is_scan(history, resource, now) {
            return Some(AttackSignal::Scan);
        }
        None
    }

    fn is_burst(&self, history: Option<&RequestHistory>, now: DateTime<Utc>) -> bool {
        let recorded = history
            .map(|h| h.count_within(ChronoDuration::seconds(BURST_WINDOW_SECS), now))
            .unwrap_or(0);
        recorded + 1 > self.config.burst_threshold as usize
    }

    fn is_slow_drip(
        &self,
        history: Option<&RequestHistory>,
        resource: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let watched = &self.config.slow_drip_resources;
        if !watched.contains(resource) {
            return false;
        }
        let recorded = history
            .map(|h| {
                h.within(ChronoDuration::seconds(SLOW_DRIP_WINDOW_SECS), now)
                    .filter(|record| watched.contains(&record.resource))
                    .count()
            })
            .unwrap_or(0);
        recorded + 1 > self.config.slow_drip_threshold as usize
    }

    fn is_scan(&self, history: Option<&RequestHistory>, resource: &str, now: DateTime<Utc>) -> bool {
        let mut distinct: HashSet<&str> = HashSet::new();
        distinct.insert(resource);
        if let Some(history) = history {
            for record in history.within(ChronoDuration::seconds(SCAN_WINDOW_SECS), now) {
                distinct.insert(record.resource.as_str());
            }
        }
        distinct.len() > self.config.scan_distinct_resource_threshold as usize
    }
}
