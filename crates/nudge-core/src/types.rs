//! Core types for the Nudge engine
//!
//! This module defines the fundamental types used throughout the engine,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Campaign Identifier
// ----------------------------------------------------------------------------

/// Unique identifier for a campaign, assigned by the server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(String);

impl CampaignId {
    /// Create a new CampaignId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CampaignId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CampaignId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ----------------------------------------------------------------------------
// Event Parameters
// ----------------------------------------------------------------------------

/// Free-form parameters attached to a tracked event
pub type EventParams = serde_json::Map<String, serde_json::Value>;

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp from epoch milliseconds
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from epoch seconds
    pub fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    /// Get the timestamp as epoch milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get the timestamp as whole epoch seconds
    pub fn as_secs(&self) -> i64 {
        (self.0 / 1000) as i64
    }

    /// The UTC calendar date this timestamp falls on
    ///
    /// Timestamps before the epoch cannot occur (u64 millis), so the
    /// conversion is total.
    pub fn date_utc(&self) -> NaiveDate {
        chrono::DateTime::from_timestamp_millis(self.0 as i64)
            .map(|dt| dt.date_naive())
            .unwrap_or(NaiveDate::MIN)
    }
}

impl core::ops::Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, millis: u64) -> Timestamp {
        Timestamp(self.0 + millis)
    }
}

impl core::ops::Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Source of current time, abstracted for deterministic testing
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Time source backed by the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as u64)
    }
}

/// Manually advanced time source for tests
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    millis: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Create a manual time source starting at the given epoch milliseconds
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Advance the clock by the given number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute epoch-millisecond value
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
