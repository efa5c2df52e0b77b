//! Engine facade
//!
//! [`MessageEngine`] ties the serialized executor, state store, sync
//! coordinator, and trigger engine together behind the public operations a
//! host application calls: tracking events, refreshing state, and managing
//! the user identity. Every state-mutating operation funnels through the
//! serialized path; read-only queries run on caller context against
//! snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use nudge_core::segmentation::IdentitySnapshot;
use nudge_core::{
    CampaignId, EngineConfig, EngineError, EventParams, PostProcessConfig, Result, TimeSource,
};

use crate::serial_worker::{SerialWorker, WorkerStats};
use crate::state::StateStore;
use crate::sync::SyncCoordinator;
use crate::traits::{DeviceInfoProvider, Presenter, StateRequest, StateTransport};
use crate::trigger::{campaign_ids, TriggerEngine};

/// Name of the internal event emitted after a successful synchronization,
/// carrying the post-merge user properties as parameters
pub const SYNC_COMPLETED_EVENT: &str = "sync_state_completed";

// ----------------------------------------------------------------------------
// Engine Internals
// ----------------------------------------------------------------------------

struct EngineInner {
    config: EngineConfig,
    worker: SerialWorker,
    store: Arc<StateStore>,
    coordinator: SyncCoordinator,
    trigger: TriggerEngine,
    device_info: Arc<dyn DeviceInfoProvider>,
    time: Arc<dyn TimeSource>,
    external_user_id: RwLock<Option<String>>,
    enabled: Arc<AtomicBool>,
}

impl EngineInner {
    fn identity_snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot {
            external_user_id: self
                .external_user_id
                .read()
                .ok()
                .and_then(|guard| guard.clone()),
            device_id: self.device_info.device_id(),
            platform: self.device_info.platform(),
        }
    }

    fn state_request(&self) -> StateRequest {
        StateRequest {
            project_id: self.config.project_id.clone(),
            external_user_id: self
                .external_user_id
                .read()
                .ok()
                .and_then(|guard| guard.clone()),
            device_id: self.device_info.device_id(),
        }
    }

    /// Count (unless internal) and evaluate one event on the serialized path
    async fn process_event(
        &self,
        name: &str,
        params: Option<&EventParams>,
        segmentation_param_keys: Option<&[String]>,
        internal: bool,
    ) {
        if !internal {
            let date = self.time.now().date_utc();
            self.store
                .increment_event(name, params, segmentation_param_keys, date)
                .await;
        }
        let identity = self.identity_snapshot();
        self.trigger.handle_event(name, params, &identity).await;
    }

    /// Refresh state and emit the internal sync-completed event on success
    async fn run_sync(&self, post: PostProcessConfig) -> Result<()> {
        let request = self.state_request();
        match self.coordinator.sync_state(request, post).await {
            Ok(report) => {
                if let Some(user) = report.user_snapshot {
                    let params: EventParams = user.properties.into_iter().collect();
                    self.process_event(SYNC_COMPLETED_EVENT, Some(&params), None, true)
                        .await;
                }
                Ok(())
            }
            Err(error) => {
                warn!(%error, "state sync failed");
                Err(error)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Message Engine
// ----------------------------------------------------------------------------

/// The in-app messaging decision engine
///
/// Cheap to clone; all clones share the same state and serialized executor.
#[derive(Clone)]
pub struct MessageEngine {
    inner: Arc<EngineInner>,
}

impl MessageEngine {
    pub(crate) fn assemble(
        config: EngineConfig,
        transport: Arc<dyn StateTransport>,
        presenter: Arc<dyn Presenter>,
        device_info: Arc<dyn DeviceInfoProvider>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let enabled = Arc::new(AtomicBool::new(config.channel_enabled));
        let store = Arc::new(StateStore::new());
        let worker = SerialWorker::new(config.worker.clone());
        let coordinator = SyncCoordinator::new(
            store.clone(),
            transport,
            config.sync.clone(),
            enabled.clone(),
        );
        let trigger = TriggerEngine::new(store.clone(), presenter, time.clone());

        Self {
            inner: Arc::new(EngineInner {
                config,
                worker,
                store,
                coordinator,
                trigger,
                device_info,
                time,
                external_user_id: RwLock::new(None),
                enabled,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Track an event: increment its intermediate counts, then evaluate and
    /// dispatch eligible campaigns
    ///
    /// Runs on the serialized path; tracking queued behind an in-flight
    /// synchronization is flushed once the sync's slot releases.
    pub fn track(
        &self,
        event_name: impl Into<String>,
        params: Option<EventParams>,
        segmentation_param_keys: Option<Vec<String>>,
    ) -> Result<()> {
        let inner = self.inner.clone();
        let name = event_name.into();
        self.inner.worker.submit(false, move |handle| async move {
            inner
                .process_event(&name, params.as_ref(), segmentation_param_keys.as_deref(), false)
                .await;
            handle.finish();
        })
    }

    // ------------------------------------------------------------------
    // Synchronization and Identity
    // ------------------------------------------------------------------

    /// Refresh cached state from the server under the given post-processing
    /// policy
    pub async fn sync_state(&self, post: PostProcessConfig) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.inner.worker.submit(false, move |handle| async move {
            let result = inner.run_sync(post).await;
            let _ = done_tx.send(result);
            handle.finish();
        })?;
        done_rx
            .await
            .map_err(|_| EngineError::ChannelClosed("sync completion".to_string()))?
    }

    /// Set user properties locally, new values winning over cached ones
    pub fn set_user_properties(&self, props: HashMap<String, Value>) -> Result<()> {
        let inner = self.inner.clone();
        self.inner.worker.submit(false, move |handle| async move {
            let now_secs = inner.time.now().as_secs();
            inner.store.set_user_properties(props, now_secs).await;
            handle.finish();
        })
    }

    /// Change or remove the external user identity and refresh state for it
    ///
    /// Setting an id merges the fetched state into the cache; removal
    /// replaces it and clears user-scoped state afterward.
    pub async fn set_external_user_id(&self, id: Option<String>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.inner.worker.submit(false, move |handle| async move {
            let post = if id.is_some() {
                PostProcessConfig::merge()
            } else {
                PostProcessConfig::replace_and_clear()
            };
            debug!(has_id = id.is_some(), "external user identity changed");
            if let Ok(mut guard) = inner.external_user_id.write() {
                *guard = id;
            }
            let result = inner.run_sync(post).await;
            let _ = done_tx.send(result);
            handle.finish();
        })?;
        done_rx
            .await
            .map_err(|_| EngineError::ChannelClosed("sync completion".to_string()))?
    }

    // ------------------------------------------------------------------
    // Queries and Controls
    // ------------------------------------------------------------------

    /// Identifiers of the campaigns the given event would dispatch right
    /// now, in priority order; read-only and safe from any thread
    pub async fn eligible_campaigns(
        &self,
        event_name: &str,
        params: Option<&EventParams>,
    ) -> Vec<CampaignId> {
        let identity = self.inner.identity_snapshot();
        let survivors = self
            .inner
            .trigger
            .eligible_campaigns(event_name, params, &identity)
            .await;
        campaign_ids(&survivors)
    }

    /// Tell the engine the currently open in-app message was closed
    pub fn message_dismissed(&self) {
        self.inner.trigger.message_dismissed();
    }

    /// Enable or disable the messaging channel globally
    pub fn set_channel_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Counters from the serialized executor
    pub fn worker_stats(&self) -> WorkerStats {
        self.inner.worker.stats()
    }

    /// The external user id currently associated with the engine
    pub fn external_user_id(&self) -> Option<String> {
        self.inner
            .external_user_id
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }
}
