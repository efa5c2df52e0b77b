//! Engine Builder API
//!
//! Builder-style wiring of the engine's collaborators. Hosts register a
//! state transport, a presenter, and a device info provider; building fails
//! with a `NotInitialized` error when a required collaborator is missing.

use std::sync::Arc;

use tracing::info;

use nudge_core::{EngineConfig, EngineError, Result, SystemTimeSource, TimeSource};

use crate::engine::MessageEngine;
use crate::traits::{DeviceInfoProvider, Presenter, StateTransport};

// ----------------------------------------------------------------------------
// Engine Builder
// ----------------------------------------------------------------------------

/// Builder for assembling a [`MessageEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn StateTransport>>,
    presenter: Option<Arc<dyn Presenter>>,
    device_info: Option<Arc<dyn DeviceInfoProvider>>,
    time: Arc<dyn TimeSource>,
}

impl EngineBuilder {
    /// Create a builder for the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            transport: None,
            presenter: None,
            device_info: None,
            time: Arc::new(SystemTimeSource::new()),
        }
    }

    /// Register the state transport collaborator
    pub fn with_transport(mut self, transport: Arc<dyn StateTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register the presenter collaborator
    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Register the device info provider
    pub fn with_device_info(mut self, device_info: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device_info = Some(device_info);
        self
    }

    /// Override the time source (tests, simulators)
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Build the engine; must be called within a tokio runtime
    pub fn build(self) -> Result<MessageEngine> {
        if self.config.project_id.is_empty() {
            return Err(EngineError::NotInitialized(
                "project id is empty".to_string(),
            ));
        }
        let transport = self.transport.ok_or_else(|| {
            EngineError::NotInitialized("no state transport registered".to_string())
        })?;
        let presenter = self
            .presenter
            .ok_or_else(|| EngineError::NotInitialized("no presenter registered".to_string()))?;
        let device_info = self.device_info.ok_or_else(|| {
            EngineError::NotInitialized("no device info provider registered".to_string())
        })?;

        info!(project_id = %self.config.project_id, "building message engine");
        Ok(MessageEngine::assemble(
            self.config,
            transport,
            presenter,
            device_info,
            self.time,
        ))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nudge_core::{CampaignId, ModalSpec};
    use serde_json::{json, Value};

    struct NullTransport;

    #[async_trait]
    impl StateTransport for NullTransport {
        async fn fetch_state(
            &self,
            _request: crate::traits::StateRequest,
        ) -> Result<Value> {
            Ok(json!({}))
        }
    }

    struct NullPresenter;

    impl Presenter for NullPresenter {
        fn present(&self, _campaign_id: &CampaignId, _modal: &ModalSpec) {}
    }

    struct NullDeviceInfo;

    impl DeviceInfoProvider for NullDeviceInfo {
        fn device_id(&self) -> String {
            "device-1".to_string()
        }
        fn platform(&self) -> String {
            "ios".to_string()
        }
    }

    #[tokio::test]
    async fn test_build_requires_all_collaborators() {
        let missing_presenter = EngineBuilder::new(EngineConfig::new("proj"))
            .with_transport(Arc::new(NullTransport))
            .with_device_info(Arc::new(NullDeviceInfo))
            .build();
        assert!(matches!(
            missing_presenter,
            Err(EngineError::NotInitialized(_))
        ));

        let complete = EngineBuilder::new(EngineConfig::new("proj"))
            .with_transport(Arc::new(NullTransport))
            .with_presenter(Arc::new(NullPresenter))
            .with_device_info(Arc::new(NullDeviceInfo))
            .build();
        assert!(complete.is_ok());
    }

    #[tokio::test]
    async fn test_build_rejects_empty_project_id() {
        let result = EngineBuilder::new(EngineConfig::new(""))
            .with_transport(Arc::new(NullTransport))
            .with_presenter(Arc::new(NullPresenter))
            .with_device_info(Arc::new(NullDeviceInfo))
            .build();
        assert!(matches!(result, Err(EngineError::NotInitialized(_))));
    }
}
