use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound for every duration field: ten years.
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Tuning for the admission engine. Immutable once the coordinator is built.
///
/// Every field has a documented default, so an empty JSON object is a valid
/// configuration. Values are checked by [`EngineConfig::validate`] before the
/// engine accepts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Tokens per second refilled into the process-wide bucket.
    pub global_rate_limit: f64,
    /// Capacity of the process-wide bucket.
    pub global_burst: u32,
    /// Tokens per second refilled into each identity's bucket.
    pub identity_rate_limit: f64,
    /// Capacity of each identity's bucket.
    pub identity_burst: u32,
    /// Requests per minute allowed per identity for specific resources.
    pub endpoint_limits: BTreeMap<String, u32>,
    /// Requests per minute from one identity that escalate to a block.
    pub block_threshold: u32,
    pub block_duration_secs: u64,
    /// Requests within one second that count as a burst attack.
    pub burst_threshold: u32,
    /// Distinct resources within ten seconds that count as scanning.
    pub scan_distinct_resource_threshold: u32,
    /// Expensive resources watched for sustained (slow-drip) abuse.
    pub slow_drip_resources: BTreeSet<String>,
    /// Requests to `slow_drip_resources` within one minute that count as abuse.
    pub slow_drip_threshold: u32,
    /// Identities that are never rate limited.
    pub whitelist: BTreeSet<String>,
    pub enable_pattern_detection: bool,
    pub enable_scan_detection: bool,
    pub enable_slow_drip_detection: bool,
    /// Maximum request records kept per identity.
    pub history_capacity: usize,
    /// Idle time after which per-identity state is reclaimed.
    pub retention_secs: u64,
    pub reclaim_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let endpoint_limits = [
            ("/api/knowledge/search", 30),
            ("/api/knowledge/index", 5),
            ("/api/antigravity/toggle", 10),
            ("/api/cache/clear", 5),
            ("/api/workflows/start", 10),
            ("/api/costs/current", 60),
            ("/api/metrics/history", 30),
            ("/api/logs/recent", 20),
        ]
        .into_iter()
        .map(|(path, limit)| (path.to_string(), limit))
        .collect();

        Self {
            global_rate_limit: 100.0,
            global_burst: 200,
            identity_rate_limit: 30.0,
            identity_burst: 60,
            endpoint_limits,
            block_threshold: 1000,
            block_duration_secs: 3600,
            burst_threshold: 50,
            scan_distinct_resource_threshold: 20,
            slow_drip_resources: ["/api/knowledge/search", "/api/logs/recent"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            slow_drip_threshold: 100,
            whitelist: ["127.0.0.1", "localhost", "::1"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            enable_pattern_detection: true,
            enable_scan_detection: true,
            enable_slow_drip_detection: true,
            history_capacity: 2000,
            retention_secs: 3600,
            reclaim_interval_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive_rate("global_rate_limit", self.global_rate_limit)?;
        positive_rate("identity_rate_limit", self.identity_rate_limit)?;
        positive("global_burst", self.global_burst as u64)?;
        positive("identity_burst", self.identity_burst as u64)?;
        positive("block_threshold", self.block_threshold as u64)?;
        positive("block_duration_secs", self.block_duration_secs)?;
        positive("burst_threshold", self.burst_threshold as u64)?;
        positive(
            "scan_distinct_resource_threshold",
            self.scan_distinct_resource_threshold as u64,
        )?;
        positive("slow_drip_threshold", self.slow_drip_threshold as u64)?;
        positive("history_capacity", self.history_capacity as u64)?;
        positive("reclaim_interval_secs", self.reclaim_interval_secs)?;
        bounded_duration("block_duration_secs", self.block_duration_secs)?;
        bounded_duration("retention_secs", self.retention_secs)?;
        bounded_duration("reclaim_interval_secs", self.reclaim_interval_secs)?;

        for (resource, limit) in &self.endpoint_limits {
            if resource.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "endpoint_limits",
                    "resource keys must not be empty",
                ));
            }
            if *limit == 0 {
                return Err(ConfigError::invalid(
                    format!("endpoint_limits.{resource}"),
                    "must be greater than zero",
                ));
            }
        }

        if self.whitelist.iter().any(|identity| identity.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "whitelist",
                "identities must not be empty",
            ));
        }

        // The per-minute volume check counts entries in the history ring.
        if self.block_threshold as usize >= self.history_capacity {
            return Err(ConfigError::invalid(
                "block_threshold",
                format!(
                    "must be below history_capacity ({}) or it can never trip",
                    self.history_capacity
                ),
            ));
        }
        if self.burst_threshold as usize >= self.history_capacity {
            return Err(ConfigError::invalid(
                "burst_threshold",
                format!("must be below history_capacity ({})", self.history_capacity),
            ));
        }
        if self.retention_secs < 60 {
            return Err(ConfigError::invalid(
                "retention_secs",
                "must cover at least the 60 second accounting window",
            ));
        }

        Ok(())
    }

    pub fn block_duration(&self) -> ChronoDuration {
        saturating_seconds(self.block_duration_secs)
    }

    pub fn retention(&self) -> ChronoDuration {
        saturating_seconds(self.retention_secs)
    }

    pub fn reclaim_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reclaim_interval_secs)
    }

    pub fn is_whitelisted(&self, identity: &str) -> bool {
        self.whitelist.contains(identity)
    }

    pub fn endpoint_limit(&self, resource: &str) -> Option<u32> {
        self.endpoint_limits.get(resource).copied()
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            identity_rate_limit: self.identity_rate_limit,
            identity_burst: self.identity_burst,
            global_rate_limit: self.global_rate_limit,
            global_burst: self.global_burst,
            block_threshold: self.block_threshold,
            block_duration_secs: self.block_duration_secs,
        }
    }
}

/// Subset of the configuration reported alongside statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ConfigSummary {
    pub identity_rate_limit: f64,
    pub identity_burst: u32,
    pub global_rate_limit: f64,
    pub global_burst: u32,
    pub block_threshold: u32,
    pub block_duration_secs: u64,
}

fn positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn bounded_duration(field: &str, secs: u64) -> Result<(), ConfigError> {
    if secs > MAX_DURATION_SECS {
        return Err(ConfigError::invalid(
            field,
            format!("must be at most {MAX_DURATION_SECS} seconds (got {secs})"),
        ));
    }
    Ok(())
}

fn saturating_seconds(secs: u64) -> ChronoDuration {
    i64::try_from(secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .unwrap_or(ChronoDuration::MAX)
}

fn positive_rate(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a finite number greater than zero (got {value})"),
        ));
    }
    Ok(())
}
