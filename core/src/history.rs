use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::clock::saturating_sub;

/// One admitted or attempted request, as remembered for pattern analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub resource: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded per-identity request log, oldest first.
///
/// Timestamps never decrease: a record stamped earlier than the newest entry
/// (clock regression) is stored with the newest entry's timestamp instead.
#[derive(Debug, Clone)]
pub struct RequestHistory {
    records: VecDeque<RequestRecord>,
    capacity: usize,
}

impl RequestHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, resource: &str, now: DateTime<Utc>) {
        let timestamp = match self.records.back() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(RequestRecord {
            resource: resource.to_string(),
            timestamp,
        });
        if self.records.len() > self.capacity {
            tracing::error!(
                len = self.records.len(),
                capacity = self.capacity,
                "request history exceeded its cap; trimming"
            );
            while self.records.len() > self.capacity {
                self.records.pop_front();
            }
        }
    }

    /// Records strictly newer than `now - window`, newest first.
    pub fn within(
        &self,
        window: ChronoDuration,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &RequestRecord> {
        let cutoff = saturating_sub(now, window);
        self.records
            .iter()
            .rev()
            .take_while(move |record| record.timestamp > cutoff)
    }

    pub fn count_within(&self, window: ChronoDuration, now: DateTime<Utc>) -> usize {
        self.within(window, now).count()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.records.back().map(|record| record.timestamp)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
