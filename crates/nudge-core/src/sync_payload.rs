//! Synchronization payload decoding and post-processing policy
//!
//! The server's state response carries up to three top-level sections: user
//! data, event intermediate counts, and campaigns. Structural problems at
//! the top level are payload errors; malformed individual entries inside the
//! arrays are dropped per-item by the section decoders.

use serde_json::Value;

use crate::campaign::{decode_campaigns, Campaign};
use crate::event_counts::{decode_event_counts, EventCounts};
use crate::user_data::UserData;
use crate::EngineError;

// ----------------------------------------------------------------------------
// Post-Processing Policy
// ----------------------------------------------------------------------------

/// How a synced collection is combined with the cached one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Merge into the cached collection (new values win, counts sum)
    Merge,
    /// Replace the cached collection wholesale
    Replace,
}

/// What to do with a successful sync result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostProcessConfig {
    /// Merge into cached state instead of replacing it
    pub merge: bool,
    /// Clear user and event state after application (identity removal)
    pub clear: bool,
}

impl PostProcessConfig {
    /// Merge-and-keep, the ordinary refresh policy
    pub fn merge() -> Self {
        Self {
            merge: true,
            clear: false,
        }
    }

    /// Replace-then-clear, the identity-removal policy
    pub fn replace_and_clear() -> Self {
        Self {
            merge: false,
            clear: true,
        }
    }

    pub fn strategy(&self) -> MergeStrategy {
        if self.merge {
            MergeStrategy::Merge
        } else {
            MergeStrategy::Replace
        }
    }
}

// ----------------------------------------------------------------------------
// Decoded Snapshot
// ----------------------------------------------------------------------------

/// Decoded server state; absent sections leave the cached collection
/// untouched
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub user_data: Option<UserData>,
    pub event_counts: Option<EventCounts>,
    pub campaigns: Option<Vec<Campaign>>,
}

/// Decode the raw state response
pub fn decode_state_payload(raw: &Value) -> Result<StateSnapshot, EngineError> {
    let object = raw
        .as_object()
        .ok_or_else(|| EngineError::InvalidPayload("state response is not an object".into()))?;

    let user_data = match object.get("userData") {
        None | Some(Value::Null) => None,
        Some(value) => Some(serde_json::from_value(value.clone()).map_err(|e| {
            EngineError::InvalidPayload(format!("malformed userData section: {e}"))
        })?),
    };

    let event_counts = match object.get("eventIntermediateCountsData") {
        None | Some(Value::Null) => None,
        Some(Value::Array(entries)) => Some(decode_event_counts(entries)),
        Some(_) => {
            return Err(EngineError::InvalidPayload(
                "eventIntermediateCountsData is not an array".into(),
            ))
        }
    };

    let campaigns = match object.get("campaignData") {
        None | Some(Value::Null) => None,
        Some(Value::Array(entries)) => Some(decode_campaigns(entries)),
        Some(_) => {
            return Err(EngineError::InvalidPayload(
                "campaignData is not an array".into(),
            ))
        }
    };

    Ok(StateSnapshot {
        user_data,
        event_counts,
        campaigns,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
