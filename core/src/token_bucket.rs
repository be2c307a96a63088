use chrono::{DateTime, Utc};

use crate::clock::elapsed_secs;

/// Lazily refilled token bucket.
///
/// There is no timer behind a bucket: tokens are recomputed from the elapsed
/// time whenever someone tries to consume. Callers own the synchronization;
/// the coordinator keeps each bucket behind its map shard lock.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// A new bucket starts full.
    pub fn new(capacity: u32, refill_per_sec: f64, now: DateTime<Utc>) -> Self {
        let capacity = capacity as f64;
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Try to take `n` tokens. A rejected attempt leaves the balance untouched.
    pub fn consume(&mut self, n: u32, now: DateTime<Utc>) -> bool {
        self.refill(now);
        let wanted = n as f64;
        if self.tokens >= wanted {
            self.tokens -= wanted;
            self.clamp();
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`, without mutating the bucket.
    pub fn available(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = elapsed_secs(self.last_refill, now);
        (self.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }

    /// Whole seconds until `n` tokens will be available, at least one.
    pub fn retry_after_secs(&self, n: u32, now: DateTime<Utc>) -> u64 {
        let missing = n as f64 - self.available(now);
        if missing <= 0.0 {
            return 1;
        }
        ((missing / self.refill_per_sec).ceil() as u64).max(1)
    }

    pub fn last_refill(&self) -> DateTime<Utc> {
        self.last_refill
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = elapsed_secs(self.last_refill, now);
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        // A regressed clock must not move the refill origin backwards, or the
        // same interval would be credited twice once the clock recovers.
        if now > self.last_refill {
            self.last_refill = now;
        }
        self.clamp();
    }

    fn clamp(&mut self) {
        if !self.tokens.is_finite() || self.tokens < 0.0 || self.tokens > self.capacity {
            tracing::error!(
                tokens = self.tokens,
                capacity = self.capacity,
                "token bucket left its valid range; clamping"
            );
            self.tokens = if self.tokens.is_finite() {
                self.tokens.clamp(0.0, self.capacity)
            } else {
                0.0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn full_bucket_admits_capacity_then_rejects() {
        let now = Utc::now();
        let mut bucket = TokenBucket::new(10, 5.0, now);
        for _ in 0..10 {
            assert!(bucket.consume(1, now));
        }
        assert!(!bucket.consume(1, now));
    }

    #[test]
    fn refill_accumulates_fractional_tokens() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(2, 0.5, start);
        assert!(bucket.consume(2, start));
        // 1.5 seconds at 0.5/s is 0.75 tokens: not enough yet.
        assert!(!bucket.consume(1, start + ChronoDuration::milliseconds(1500)));
        // Another 0.5 seconds brings it to exactly 1.0.
        assert!(bucket.consume(1, start + ChronoDuration::seconds(2)));
    }

    #[test]
    fn rejected_attempt_does_not_spend_partial_tokens() {
        let now = Utc::now();
        let mut bucket = TokenBucket::new(5, 1.0, now);
        assert!(bucket.consume(3, now));
        assert!(!bucket.consume(3, now));
        assert_eq!(bucket.available(now), 2.0);
    }

    #[test]
    fn idle_for_capacity_over_rate_always_admits_one() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(10, 5.0, start);
        for _ in 0..10 {
            bucket.consume(1, start);
        }
        assert!(bucket.consume(1, start + ChronoDuration::seconds(2)));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(4, 100.0, start);
        bucket.consume(1, start);
        let later = start + ChronoDuration::hours(10);
        assert_eq!(bucket.available(later), 4.0);
        assert!(bucket.consume(4, later));
        assert!(!bucket.consume(1, later));
    }

    #[test]
    fn clock_regression_grants_no_tokens() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(3, 1.0, start);
        for _ in 0..3 {
            assert!(bucket.consume(1, start));
        }
        let rewound = start - ChronoDuration::minutes(10);
        assert!(!bucket.consume(1, rewound));
        assert_eq!(bucket.last_refill(), start);
        // Recovering to the original instant must not credit the rewind either.
        assert!(!bucket.consume(1, start));
        assert!(bucket.consume(1, start + ChronoDuration::seconds(1)));
    }

    #[test]
    fn retry_after_reflects_missing_tokens() {
        let now = Utc::now();
        let mut bucket = TokenBucket::new(2, 0.5, now);
        bucket.consume(2, now);
        assert_eq!(bucket.retry_after_secs(1, now), 2);
        assert_eq!(bucket.retry_after_secs(2, now), 4);
    }

    #[test]
    fn tokens_stay_within_bounds_under_mixed_traffic() {
        let start = Utc::now();
        let mut bucket = TokenBucket::new(7, 3.0, start);
        let mut now = start;
        for step in 0..500i64 {
            now += ChronoDuration::milliseconds((step * 37) % 450);
            bucket.consume(((step % 4) + 1) as u32, now);
            let tokens = bucket.available(now);
            assert!((0.0..=7.0).contains(&tokens));
        }
    }
}
