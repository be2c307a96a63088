use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

use crate::clock::{saturating_add, saturating_sub, secs_until};

const WINDOW_SECS: i64 = 60;

/// Exact trailing-minute log for one (identity, resource) pair.
#[derive(Debug, Clone, Default)]
struct ResourceWindow {
    hits: VecDeque<DateTime<Utc>>,
}

impl ResourceWindow {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = saturating_sub(now, ChronoDuration::seconds(WINDOW_SECS));
        while self.hits.front().is_some_and(|hit| *hit < cutoff) {
            self.hits.pop_front();
        }
    }

    fn try_record(&mut self, limit: u32, now: DateTime<Utc>) -> bool {
        self.prune(now);
        let limit = limit as usize;
        if self.hits.len() >= limit {
            if self.hits.len() > limit {
                tracing::error!(
                    len = self.hits.len(),
                    limit,
                    "resource window exceeded its limit; trimming"
                );
                while self.hits.len() > limit {
                    self.hits.pop_front();
                }
            }
            return false;
        }
        let stamp = match self.hits.back() {
            Some(last) if *last > now => *last,
            _ => now,
        };
        self.hits.push_back(stamp);
        true
    }

    fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.hits.front() {
            Some(oldest) => secs_until(
                now,
                saturating_add(*oldest, ChronoDuration::seconds(WINDOW_SECS)),
            ),
            None => 1,
        }
    }
}

/// Outcome of a per-resource quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    Admitted,
    Exceeded { retry_after_secs: u64 },
}

/// Per-(identity, resource) requests-per-minute quotas.
#[derive(Debug, Default)]
pub struct SlidingWindowCounter {
    windows: DashMap<(String, String), ResourceWindow>,
}

impl SlidingWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_record(
        &self,
        identity: &str,
        resource: &str,
        limit_per_minute: u32,
        now: DateTime<Utc>,
    ) -> WindowOutcome {
        let mut window = self
            .windows
            .entry((identity.to_string(), resource.to_string()))
            .or_default();
        if window.try_record(limit_per_minute, now) {
            WindowOutcome::Admitted
        } else {
            WindowOutcome::Exceeded {
                retry_after_secs: window.retry_after_secs(now),
            }
        }
    }

    pub fn clear_identity(&self, identity: &str) {
        self.windows.retain(|(owner, _), _| owner != identity);
    }

    /// Keys whose newest hit is older than `horizon` (or that are empty).
    pub fn stale_keys(&self, horizon: DateTime<Utc>) -> Vec<(String, String)> {
        self.windows
            .iter()
            .filter(|entry| entry.value().hits.back().is_none_or(|last| *last < horizon))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Removes `key` only if it is still stale at removal time.
    pub fn remove_if_stale(&self, key: &(String, String), horizon: DateTime<Utc>) -> bool {
        self.windows
            .remove_if(key, |_, window| {
                window.hits.back().is_none_or(|last| *last < horizon)
            })
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_enforced_within_the_minute() {
        let counter = SlidingWindowCounter::new();
        let now = Utc::now();
        for _ in 0..5 {
            assert_eq!(counter.try_record("b", "/search", 5, now), WindowOutcome::Admitted);
        }
        assert!(matches!(
            counter.try_record("b", "/search", 5, now),
            WindowOutcome::Exceeded { .. }
        ));
    }

    #[test]
    fn quotas_are_partitioned_by_identity_and_resource() {
        let counter = SlidingWindowCounter::new();
        let now = Utc::now();
        assert_eq!(counter.try_record("a", "/x", 1, now), WindowOutcome::Admitted);
        assert_eq!(counter.try_record("a", "/y", 1, now), WindowOutcome::Admitted);
        assert_eq!(counter.try_record("b", "/x", 1, now), WindowOutcome::Admitted);
        assert!(matches!(
            counter.try_record("a", "/x", 1, now),
            WindowOutcome::Exceeded { .. }
        ));
    }

    #[test]
    fn window_slides_exactly_rather_than_resetting_on_the_minute() {
        let counter = SlidingWindowCounter::new();
        let start = Utc::now();
        let limit = 4;
        for _ in 0..limit {
            counter.try_record("a", "/r", limit, start);
        }
        // Requests L+1..2L inside the same window are all denied.
        for offset in 1..=limit as i64 {
            let at = start + ChronoDuration::seconds(offset * 10);
            assert!(matches!(
                counter.try_record("a", "/r", limit, at),
                WindowOutcome::Exceeded { .. }
            ));
        }
        // 61 seconds after the first request, the window has room again.
        assert_eq!(
            counter.try_record("a", "/r", limit, start + ChronoDuration::seconds(61)),
            WindowOutcome::Admitted
        );
    }

    #[test]
    fn retry_after_points_at_oldest_hit_leaving_the_window() {
        let counter = SlidingWindowCounter::new();
        let start = Utc::now();
        counter.try_record("a", "/r", 1, start);
        let outcome = counter.try_record("a", "/r", 1, start + ChronoDuration::seconds(45));
        assert_eq!(outcome, WindowOutcome::Exceeded { retry_after_secs: 15 });
    }

    #[test]
    fn clock_regression_does_not_clear_the_window() {
        let counter = SlidingWindowCounter::new();
        let start = Utc::now();
        counter.try_record("a", "/r", 2, start);
        counter.try_record("a", "/r", 2, start);
        let rewound = start - ChronoDuration::minutes(5);
        assert!(matches!(
            counter.try_record("a", "/r", 2, rewound),
            WindowOutcome::Exceeded { .. }
        ));
    }

    #[test]
    fn stale_keys_are_removed_and_fresh_ones_kept() {
        let counter = SlidingWindowCounter::new();
        let start = Utc::now();
        counter.try_record("old", "/r", 5, start);
        counter.try_record("new", "/r", 5, start + ChronoDuration::hours(2));
        let horizon = start + ChronoDuration::hours(1);
        let stale = counter.stale_keys(horizon);
        assert_eq!(stale, vec![("old".to_string(), "/r".to_string())]);
        assert!(counter.remove_if_stale(&stale[0], horizon));
        assert_eq!(counter.len(), 1);
    }

    #[test]
    fn clear_identity_drops_all_of_its_windows() {
        let counter = SlidingWindowCounter::new();
        let now = Utc::now();
        counter.try_record("a", "/x", 5, now);
        counter.try_record("a", "/y", 5, now);
        counter.try_record("b", "/x", 5, now);
        counter.clear_identity("a");
        assert_eq!(counter.len(), 1);
    }
}
