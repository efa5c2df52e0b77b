//! Nudge Runtime
//!
//! Tokio-based orchestration for the Nudge in-app messaging engine: the
//! serialized task executor, the state store and synchronization
//! coordinator, the trigger engine, and the [`MessageEngine`] facade that
//! ties them to the host application's collaborators (state transport,
//! device info provider, presenter).

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod builder;
pub mod engine;
pub mod lock_chain;
pub mod serial_worker;
pub mod state;
pub mod sync;
pub mod traits;
pub mod trigger;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use builder::EngineBuilder;
pub use engine::{MessageEngine, SYNC_COMPLETED_EVENT};
pub use lock_chain::{LockChain, LockToken, LockWaiter};
pub use serial_worker::{SerialWorker, TaskHandle, WorkerStats};
pub use state::{StateOwner, StateStore};
pub use sync::{SyncCoordinator, SyncReport};
pub use traits::{DeviceInfoProvider, Presenter, StateRequest, StateTransport};
pub use trigger::TriggerEngine;

pub use nudge_core::{EngineConfig, EngineError, PostProcessConfig, Result};
