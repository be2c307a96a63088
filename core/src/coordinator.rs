use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::blocklist::{BlockReason, Blocklist};
use crate::clock::{Clock, SystemClock, secs_until};
use crate::config::EngineConfig;
use crate::decision::{Decision, Verdict};
use crate::detector::{AttackSignal, PatternDetector};
use crate::error::ConfigError;
use crate::history::RequestHistory;
use crate::reclaimer::{ReclaimReport, ReclaimerHandle, reclaim_pass};
use crate::sliding_window::{SlidingWindowCounter, WindowOutcome};
use crate::stats::{AdmissionStats, Statistics};
use crate::token_bucket::TokenBucket;

const VOLUME_WINDOW_SECS: i64 = 60;

/// State shared between the request path and the reclaimer.
///
/// Each store is its own sharded map, so identities hashed to different shards
/// never contend and a read-modify-write on one identity is atomic.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) buckets: DashMap<String, TokenBucket>,
    pub(crate) global: Mutex<TokenBucket>,
    pub(crate) histories: DashMap<String, RequestHistory>,
    pub(crate) windows: SlidingWindowCounter,
    pub(crate) blocklist: Blocklist,
    pub(crate) stats: Statistics,
}

/// Conceptual per-identity state exposed to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    Clear,
    Throttled,
    Blocked,
}

/// Operator view of one identity.
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct IdentitySnapshot {
    pub identity: String,
    pub state: IdentityState,
    pub whitelisted: bool,
    /// Tokens currently available, if a bucket exists.
    pub tokens: Option<f64>,
    pub recent_requests_60s: u64,
    pub history_len: u64,
    pub blocked_until: Option<DateTime<Utc>>,
    pub block_reason: Option<BlockReason>,
}

/// Single entry point of the admission engine.
///
/// Built once at startup and shared with request handlers. `evaluate` is
/// synchronous and never blocks on I/O.
pub struct AdmissionCoordinator {
    shared: Arc<EngineShared>,
    reclaimer: Mutex<Option<ReclaimerHandle>>,
}

impl AdmissionCoordinator {
    /// Engine on the system clock, without the background reclaimer.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now();
        let global = TokenBucket::new(config.global_burst, config.global_rate_limit, now);
        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                clock,
                buckets: DashMap::new(),
                global: Mutex::new(global),
                histories: DashMap::new(),
                windows: SlidingWindowCounter::new(),
                blocklist: Blocklist::new(),
                stats: Statistics::default(),
            }),
            reclaimer: Mutex::new(None),
        })
    }

    /// Engine on the system clock with the reclaimer running on the current
    /// tokio runtime.
    pub async fn start(config: EngineConfig) -> Result<Self, ConfigError> {
        let coordinator = Self::new(config)?;
        coordinator.spawn_reclaimer();
        Ok(coordinator)
    }

    /// Starts the periodic reclaimer if it is not already running.
    /// Must be called from within a tokio runtime.
    pub fn spawn_reclaimer(&self) {
        let mut slot = self.reclaimer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(ReclaimerHandle::spawn(self.shared.clone()));
            tracing::info!(
                interval_secs = self.shared.config.reclaim_interval_secs,
                retention_secs = self.shared.config.retention_secs,
                "admission reclaimer started"
            );
        }
    }

    /// Stops the reclaimer and waits for it to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let handle = self
            .reclaimer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Decide whether `identity` may access `resource` now.
    pub fn evaluate(&self, identity: &str, resource: &str) -> Decision {
        let shared = &*self.shared;
        let now = shared.clock.now();
        shared.stats.observe();

        let decision = self.decide(identity, resource, now);
        shared.stats.count(decision.verdict);

        if !decision.allowed {
            tracing::debug!(
                identity = %identity,
                resource = %resource,
                verdict = decision.verdict.as_str(),
                retry_after_secs = decision.retry_after_secs,
                "request denied"
            );
        }
        decision
    }

    fn decide(&self, identity: &str, resource: &str, now: DateTime<Utc>) -> Decision {
        let shared = &*self.shared;
        let config = &shared.config;

        if config.is_whitelisted(identity) {
            return Decision::allow(Verdict::Whitelisted);
        }

        if let Some(entry) = shared.blocklist.active(identity, now) {
            return Decision::deny(Verdict::Blocked, secs_until(now, entry.blocked_until));
        }

        let signal = {
            let history = shared.histories.get(identity);
            PatternDetector::new(config).detect(history.as_deref(), resource, now)
        };
        if let Some(signal) = signal {
            let until = self.escalate(identity, block_reason_for(signal), now);
            return Decision::deny(Verdict::SuspiciousPattern, secs_until(now, until));
        }

        if let Some(limit) = config.endpoint_limit(resource)
            && let WindowOutcome::Exceeded { retry_after_secs } =
                shared.windows.try_record(identity, resource, limit, now)
        {
            return Decision::deny(Verdict::EndpointLimited, retry_after_secs);
        }

        if let Err(retry_after_secs) = self.consume_identity_token(identity, now) {
            let minute_count = self.record(identity, resource, now);
            if minute_count > config.block_threshold as usize {
                let until = self.escalate(identity, BlockReason::ExcessiveVolume, now);
                return Decision::deny(Verdict::Escalated, secs_until(now, until));
            }
            return Decision::deny(Verdict::RateLimited, retry_after_secs);
        }

        if let Err(retry_after_secs) = self.consume_global_token(now) {
            return Decision::deny(Verdict::GlobalRateLimited, retry_after_secs);
        }

        let minute_count = self.record(identity, resource, now);
        if minute_count > config.block_threshold as usize {
            // Admitted, but the next request from this identity is refused.
            self.escalate(identity, BlockReason::ExcessiveVolume, now);
        }
        Decision::allow(Verdict::Allowed)
    }

    fn consume_identity_token(&self, identity: &str, now: DateTime<Utc>) -> Result<(), u64> {
        let shared = &*self.shared;
        let attempt = |bucket: &mut TokenBucket| {
            if bucket.consume(1, now) {
                Ok(())
            } else {
                Err(bucket.retry_after_secs(1, now))
            }
        };

        if let Some(mut bucket) = shared.buckets.get_mut(identity) {
            return attempt(&mut bucket);
        }
        let mut bucket = shared
            .buckets
            .entry(identity.to_string())
            .or_insert_with(|| {
                shared.stats.identity_tracked();
                TokenBucket::new(
                    shared.config.identity_burst,
                    shared.config.identity_rate_limit,
                    now,
                )
            });
        attempt(&mut bucket)
    }

    fn consume_global_token(&self, now: DateTime<Utc>) -> Result<(), u64> {
        let mut global = self
            .shared
            .global
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if global.consume(1, now) {
            Ok(())
        } else {
            Err(global.retry_after_secs(1, now))
        }
    }

    /// Appends to the identity's history and returns its trailing-minute count.
    fn record(&self, identity: &str, resource: &str, now: DateTime<Utc>) -> usize {
        let shared = &*self.shared;
        let window = ChronoDuration::seconds(VOLUME_WINDOW_SECS);
        if let Some(mut history) = shared.histories.get_mut(identity) {
            history.record(resource, now);
            return history.count_within(window, now);
        }
        let mut history = shared
            .histories
            .entry(identity.to_string())
            .or_insert_with(|| RequestHistory::new(shared.config.history_capacity));
        history.record(resource, now);
        history.count_within(window, now)
    }

    fn escalate(&self, identity: &str, reason: BlockReason, now: DateTime<Utc>) -> DateTime<Utc> {
        let shared = &*self.shared;
        let until = shared
            .blocklist
            .block(identity, shared.config.block_duration(), reason, now);
        shared.stats.escalated();
        tracing::warn!(
            identity = %identity,
            reason = reason.as_str(),
            blocked_until = %until.to_rfc3339(),
            "identity escalated to blocklist"
        );
        until
    }

    pub fn stats(&self) -> AdmissionStats {
        let shared = &*self.shared;
        let now = shared.clock.now();
        let counters = shared.stats.snapshot();
        AdmissionStats {
            total_requests: counters.total_requests,
            allowed_count: counters.allowed_count,
            blocked_count: counters.blocked_count,
            rate_limited_count: counters.rate_limited_count,
            unique_identities: counters.unique_identities,
            currently_blocked_count: shared.blocklist.active_count(now) as u64,
            escalations: counters.escalations,
            active_buckets: shared.buckets.len() as u64,
            tracked_histories: shared.histories.len() as u64,
            config: shared.config.summary(),
        }
    }

    /// Clears block, bucket, history and resource windows for `identity`.
    /// Returns whether any state existed; resetting an unknown identity is a no-op.
    pub fn reset_identity(&self, identity: &str) -> bool {
        let shared = &*self.shared;
        let unblocked = shared.blocklist.unblock(identity);
        let bucket = shared.buckets.remove(identity).is_some();
        let history = shared.histories.remove(identity).is_some();
        shared.windows.clear_identity(identity);

        let existed = unblocked || bucket || history;
        tracing::info!(
            identity = %identity,
            unblocked,
            existed,
            "admission state reset"
        );
        existed
    }

    pub fn inspect_identity(&self, identity: &str) -> IdentitySnapshot {
        let shared = &*self.shared;
        let now = shared.clock.now();
        let block = shared.blocklist.active(identity, now);
        let tokens = shared
            .buckets
            .get(identity)
            .map(|bucket| bucket.available(now));
        let (recent, len) = shared
            .histories
            .get(identity)
            .map(|history| {
                (
                    history.count_within(ChronoDuration::seconds(VOLUME_WINDOW_SECS), now),
                    history.len(),
                )
            })
            .unwrap_or((0, 0));

        let state = if block.is_some() {
            IdentityState::Blocked
        } else if tokens.is_some_and(|available| available < 1.0) {
            IdentityState::Throttled
        } else {
            IdentityState::Clear
        };

        IdentitySnapshot {
            identity: identity.to_string(),
            state,
            whitelisted: shared.config.is_whitelisted(identity),
            tokens,
            recent_requests_60s: recent as u64,
            history_len: len as u64,
            blocked_until: block.as_ref().map(|entry| entry.blocked_until),
            block_reason: block.map(|entry| entry.reason),
        }
    }

    /// Runs one reclaim pass immediately, outside the periodic schedule.
    pub fn reclaim_now(&self) -> ReclaimReport {
        let now = self.shared.clock.now();
        reclaim_pass(&self.shared, now, || false)
    }
}

fn block_reason_for(signal: AttackSignal) -> BlockReason {
    match signal {
        AttackSignal::Burst => BlockReason::BurstPattern,
        AttackSignal::SlowDrip => BlockReason::SlowDripPattern,
        AttackSignal::Scan => BlockReason::ScanPattern,
    }
}
