//! Sentinel admission engine.
//!
//! Decides per inbound request whether a caller is admitted, throttled or
//! blocked. All state is in memory and partitioned by caller identity.
//! [`AdmissionCoordinator`] is the only entry point.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;

mod blocklist;
mod coordinator;
mod decision;
mod detector;
mod history;
mod reclaimer;
mod sliding_window;
mod stats;
mod token_bucket;

pub use blocklist::BlockReason;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigSummary, EngineConfig};
pub use coordinator::{AdmissionCoordinator, IdentitySnapshot, IdentityState};
pub use decision::{Decision, Verdict};
pub use error::ConfigError;
pub use reclaimer::ReclaimReport;
pub use stats::AdmissionStats;
