//! Nudge Core Decision Logic
//!
//! This crate provides the pure, I/O-free half of the Nudge in-app messaging
//! engine: identifiers and timestamps, cached user state, event-count
//! aggregation, the campaign model with its wire decoding, and the
//! segmentation rules evaluator. Everything here operates on in-memory
//! snapshots and is fully testable without a runtime.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod campaign;
pub mod config;
pub mod event_counts;
pub mod segmentation;
pub mod sync_payload;
pub mod types;
pub mod user_data;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use campaign::{Campaign, CooldownUnit, ModalSpec, ReEligibility};
pub use config::{EngineConfig, SyncConfig, WorkerConfig};
pub use event_counts::{EventCountKey, EventCounts, COUNT_INVALID};
pub use segmentation::{is_eligible, EvalContext, IdentitySnapshot, SegmentInfo};
pub use sync_payload::{MergeStrategy, PostProcessConfig, StateSnapshot};
pub use types::{CampaignId, EventParams, ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};
pub use user_data::{UserData, HIDE_FOREVER};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Core error types for the Nudge engine
///
/// Clonable so that a single failure outcome can be fanned out to every
/// waiter chained on an in-flight synchronization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine is not initialized: {0}")]
    NotInitialized(String),

    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("state fetch rejected: {0}")]
    NotAuthorized(String),

    #[error("internal channel closed: {0}")]
    ChannelClosed(String),
}

pub type Result<T> = core::result::Result<T, EngineError>;
