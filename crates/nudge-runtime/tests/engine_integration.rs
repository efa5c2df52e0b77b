//! Integration tests for the message engine
//!
//! Exercises the full decision path through the public facade: state sync
//! populating the cached campaigns, serialized event tracking, segmentation
//! over aggregated counts, and delayed dispatch to a stub presenter. Stub
//! collaborators stand in for the transport, presenter, and device identity
//! so the tests are deterministic under tokio's paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use nudge_core::{CampaignId, EngineConfig, ManualTimeSource, ModalSpec, PostProcessConfig};
use nudge_runtime::{
    DeviceInfoProvider, EngineBuilder, MessageEngine, Presenter, StateRequest, StateTransport,
};

// ----------------------------------------------------------------------------
// Stub Collaborators
// ----------------------------------------------------------------------------

struct StubTransport {
    payload: Mutex<Value>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl StubTransport {
    fn new(payload: Value) -> Self {
        Self {
            payload: Mutex::new(payload),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    fn with_delay(payload: Value, delay: Duration) -> Self {
        Self {
            payload: Mutex::new(payload),
            delay,
            fetches: AtomicUsize::new(0),
        }
    }

    fn set_payload(&self, payload: Value) {
        *self.payload.lock().unwrap() = payload;
    }
}

#[async_trait]
impl StateTransport for StubTransport {
    async fn fetch_state(&self, _request: StateRequest) -> nudge_core::Result<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.payload.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct StubPresenter {
    presented: Mutex<Vec<CampaignId>>,
}

impl StubPresenter {
    fn presented_ids(&self) -> Vec<String> {
        self.presented
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }
}

impl Presenter for StubPresenter {
    fn present(&self, campaign_id: &CampaignId, _modal: &ModalSpec) {
        self.presented.lock().unwrap().push(campaign_id.clone());
    }
}

struct StubDeviceInfo;

impl DeviceInfoProvider for StubDeviceInfo {
    fn device_id(&self) -> String {
        "device-1".to_string()
    }
    fn platform(&self) -> String {
        "ios".to_string()
    }
}

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// 2024-06-15T00:00:00Z
const TEST_EPOCH_MILLIS: u64 = 1_718_409_600_000;

fn build_engine(transport: Arc<StubTransport>) -> (MessageEngine, Arc<StubPresenter>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let presenter = Arc::new(StubPresenter::default());
    let time = Arc::new(ManualTimeSource::new(TEST_EPOCH_MILLIS));
    let engine = EngineBuilder::new(EngineConfig::new("proj-1"))
        .with_transport(transport)
        .with_presenter(presenter.clone())
        .with_device_info(Arc::new(StubDeviceInfo))
        .with_time_source(time)
        .build()
        .expect("engine builds");
    (engine, presenter)
}

fn purchase_campaign_payload() -> Value {
    json!({
        "campaignData": [{
            "id": "purchase-nudge",
            "status": "active",
            "triggering_event": "purchase",
            "campaign_start": 0,
            "delay": 3,
            "segment_info": {
                "group_operator": "OR",
                "groups": [{
                    "condition_operator": "AND",
                    "conditions": [{
                        "unit": "event",
                        "event": "purchase",
                        "operator": ">=",
                        "value": 2,
                        "num_days": 7
                    }]
                }]
            },
            "message": {"template_name": "promo"},
            "updated_at": 100
        }]
    })
}

// ----------------------------------------------------------------------------
// End-to-End Dispatch
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_count_threshold_campaign_dispatches_on_second_purchase() {
    let transport = Arc::new(StubTransport::new(purchase_campaign_payload()));
    let (engine, presenter) = build_engine(transport);

    engine.sync_state(PostProcessConfig::merge()).await.unwrap();

    // First purchase: count is 1, the ≥2 threshold is not met.
    engine.track("purchase", None, None).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(presenter.presented_ids().is_empty());
    assert!(engine.eligible_campaigns("purchase", None).await.is_empty());

    // Second purchase crosses the threshold; display honors the 3s delay.
    engine.track("purchase", None, None).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(presenter.presented_ids().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(presenter.presented_ids(), vec!["purchase-nudge"]);

    // The query view agrees with the dispatch decision.
    assert_eq!(
        engine.eligible_campaigns("purchase", None).await,
        vec![CampaignId::new("purchase-nudge")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tracking_queued_behind_sync_flushes_after_unlock() {
    let payload = json!({
        "campaignData": [{
            "id": "instant",
            "status": "active",
            "triggering_event": "open",
            "campaign_start": 0,
            "message": {"template_name": "hello"},
            "updated_at": 1
        }]
    });
    let transport = Arc::new(StubTransport::with_delay(payload, Duration::from_secs(2)));
    let (engine, presenter) = build_engine(transport);

    // Kick off a slow sync and track while it holds the serialized slot.
    let sync = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_state(PostProcessConfig::merge()).await })
    };
    tokio::task::yield_now().await;
    engine.track("open", None, None).unwrap();

    // The tracked event stays queued while the fetch is in flight.
    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert!(presenter.presented_ids().is_empty());

    // Once the sync unlocks, the queued track runs against the fresh
    // campaign set.
    tokio::time::sleep(Duration::from_millis(300)).await;
    sync.await.unwrap().unwrap();
    assert_eq!(presenter.presented_ids(), vec!["instant"]);
}

// ----------------------------------------------------------------------------
// Synthetic Sync-Completed Event
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_sync_completed_event_triggers_without_counting() {
    let payload = json!({
        "userData": {"properties": {"plan": "pro"}},
        "campaignData": [
            {
                // Never eligible: internal events are not counted, so the
                // count stays 0 forever.
                "id": "counted",
                "status": "active",
                "triggering_event": "sync_state_completed",
                "campaign_start": 0,
                "segment_info": {
                    "group_operator": "OR",
                    "groups": [{
                        "condition_operator": "AND",
                        "conditions": [{
                            "unit": "event",
                            "event": "sync_state_completed",
                            "operator": ">=",
                            "value": 1
                        }]
                    }]
                },
                "message": {"template_name": "counted"},
                "updated_at": 200
            },
            {
                // Eligible via the synced user property carried as an event
                // parameter of the synthetic event.
                "id": "greeting",
                "status": "active",
                "triggering_event": "sync_state_completed",
                "campaign_start": 0,
                "segment_info": {
                    "group_operator": "OR",
                    "groups": [{
                        "condition_operator": "AND",
                        "conditions": [{
                            "unit": "user",
                            "attribute": "plan",
                            "operator": "=",
                            "value": "pro",
                            "value_type": "TEXT"
                        }]
                    }]
                },
                "message": {"template_name": "greeting"},
                "updated_at": 100
            }
        ]
    });
    let transport = Arc::new(StubTransport::new(payload));
    let (engine, presenter) = build_engine(transport);

    engine.sync_state(PostProcessConfig::merge()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(presenter.presented_ids(), vec!["greeting"]);

    // A second sync emits the event again; the count-based campaign still
    // never fires because synthetic events are not aggregated.
    engine.message_dismissed();
    engine.sync_state(PostProcessConfig::merge()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(presenter.presented_ids(), vec!["greeting", "greeting"]);
}

// ----------------------------------------------------------------------------
// Identity Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_identity_removal_clears_user_state() {
    let transport = Arc::new(StubTransport::new(json!({
        "userData": {"properties": {"plan": "pro"}},
        "campaignData": [{
            "id": "pro-only",
            "status": "active",
            "triggering_event": "open",
            "campaign_start": 0,
            "segment_info": {
                "group_operator": "OR",
                "groups": [{
                    "condition_operator": "AND",
                    "conditions": [{
                        "unit": "user",
                        "attribute": "plan",
                        "operator": "=",
                        "value": "pro",
                        "value_type": "TEXT"
                    }]
                }]
            },
            "message": {"template_name": "pro"},
            "updated_at": 1
        }]
    })));
    let (engine, _presenter) = build_engine(transport.clone());

    engine
        .set_external_user_id(Some("user-1".to_string()))
        .await
        .unwrap();
    assert_eq!(engine.external_user_id().as_deref(), Some("user-1"));
    assert_eq!(
        engine.eligible_campaigns("open", None).await,
        vec![CampaignId::new("pro-only")]
    );

    // Removing the identity replaces-and-clears: the plan property is gone
    // and the campaign no longer matches.
    transport.set_payload(json!({"campaignData": []}));
    engine.set_external_user_id(None).await.unwrap();
    assert_eq!(engine.external_user_id(), None);
    assert!(engine.eligible_campaigns("open", None).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_channel_skips_fetch_entirely() {
    let transport = Arc::new(StubTransport::new(json!({})));
    let (engine, _presenter) = build_engine(transport.clone());

    engine.set_channel_enabled(false);
    engine.sync_state(PostProcessConfig::merge()).await.unwrap();
    assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);

    engine.set_channel_enabled(true);
    engine.sync_state(PostProcessConfig::merge()).await.unwrap();
    assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
}
