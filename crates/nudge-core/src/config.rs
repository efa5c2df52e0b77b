//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used throughout the
//! engine to provide a unified, consistent configuration interface.

use core::time::Duration;

// ----------------------------------------------------------------------------
// Worker Configuration
// ----------------------------------------------------------------------------

/// Configuration for the serialized task executor
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorkerConfig {
    /// Time after which a task that never signaled completion forcibly
    /// releases the execution slot
    pub task_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Sync Configuration
// ----------------------------------------------------------------------------

/// Configuration for state synchronization
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncConfig {
    /// Time after which an in-flight state fetch auto-unlocks with a
    /// timeout error
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Top-level configuration for the messaging engine
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Project identifier sent with every state fetch
    pub project_id: String,
    /// Whether the in-app messaging channel starts enabled
    pub channel_enabled: bool,
    /// Serialized executor settings
    pub worker: WorkerConfig,
    /// Synchronization settings
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Create a configuration with defaults for the given project
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            channel_enabled: true,
            worker: WorkerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}
