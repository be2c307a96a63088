use serde::Serialize;

/// Typed outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Whitelisted,
    /// Identity is on the blocklist.
    Blocked,
    /// A pattern heuristic tripped and the identity was just blocked.
    SuspiciousPattern,
    /// Per-resource quota exhausted.
    EndpointLimited,
    /// Bucket exhausted and per-minute volume crossed the block threshold.
    Escalated,
    /// Identity bucket exhausted.
    RateLimited,
    /// Process-wide bucket exhausted.
    GlobalRateLimited,
}

impl Verdict {
    pub fn reason(self) -> &'static str {
        match self {
            Verdict::Allowed => "allowed",
            Verdict::Whitelisted => "whitelisted",
            Verdict::Blocked => "temporarily blocked due to excessive requests",
            Verdict::SuspiciousPattern => "suspicious request pattern detected",
            Verdict::EndpointLimited => "endpoint rate limit exceeded",
            Verdict::Escalated => "blocked due to excessive requests",
            Verdict::RateLimited => "rate limit exceeded, slow down",
            Verdict::GlobalRateLimited => "global rate limit exceeded, slow down",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allowed => "allowed",
            Verdict::Whitelisted => "whitelisted",
            Verdict::Blocked => "blocked",
            Verdict::SuspiciousPattern => "suspicious_pattern",
            Verdict::EndpointLimited => "endpoint_limited",
            Verdict::Escalated => "escalated",
            Verdict::RateLimited => "rate_limited",
            Verdict::GlobalRateLimited => "global_rate_limited",
        }
    }
}

/// Result of [`crate::AdmissionCoordinator::evaluate`]. Overload is a normal
/// outcome and is always reported here, never as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: &'static str,
    pub verdict: Verdict,
    /// Seconds the caller should wait before retrying, on denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    pub(crate) fn allow(verdict: Verdict) -> Self {
        Self {
            allowed: true,
            reason: verdict.reason(),
            verdict,
            retry_after_secs: None,
        }
    }

    pub(crate) fn deny(verdict: Verdict, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            reason: verdict.reason(),
            verdict,
            retry_after_secs: Some(retry_after_secs.max(1)),
        }
    }
}
