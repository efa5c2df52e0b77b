//! Collaborator interfaces
//!
//! The engine consumes transport, identity, and presentation as pluggable
//! collaborators so hosts (mobile shells, tests, simulators) can supply
//! their own implementations while the decision logic stays unchanged.

use async_trait::async_trait;
use serde_json::Value;

use nudge_core::{CampaignId, EngineError, ModalSpec};

// ----------------------------------------------------------------------------
// State Transport
// ----------------------------------------------------------------------------

/// Identifies one state fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRequest {
    pub project_id: String,
    pub external_user_id: Option<String>,
    pub device_id: String,
}

/// Fetches the remote state snapshot for a user
///
/// Transport concerns (HTTP, auth, retries) live entirely behind this
/// boundary; the engine only consumes the raw response value.
#[async_trait]
pub trait StateTransport: Send + Sync {
    async fn fetch_state(&self, request: StateRequest) -> Result<Value, EngineError>;
}

// ----------------------------------------------------------------------------
// Device Info Provider
// ----------------------------------------------------------------------------

/// Supplies device-scoped identity attributes
pub trait DeviceInfoProvider: Send + Sync {
    fn device_id(&self) -> String;
    fn platform(&self) -> String;
}

// ----------------------------------------------------------------------------
// Presenter
// ----------------------------------------------------------------------------

/// Renders an in-app message
///
/// Invoked once per dispatched campaign after all display-time checks pass.
/// Rendering and interaction are out of scope here; the host must call
/// [`crate::MessageEngine::message_dismissed`] when the modal closes.
pub trait Presenter: Send + Sync {
    fn present(&self, campaign_id: &CampaignId, modal: &ModalSpec);
}
