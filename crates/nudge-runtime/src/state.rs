//! Cached engine state
//!
//! Holds the three synced collections. Each collection sits behind its own
//! lock so a slow refresh of one never blocks reads or writes of the
//! others; all mutation happens on the serialized path, readers take cheap
//! cloned snapshots.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use nudge_core::{
    Campaign, CampaignId, EventCounts, EventParams, MergeStrategy, PostProcessConfig,
    StateSnapshot, UserData,
};

// ----------------------------------------------------------------------------
// State Owner
// ----------------------------------------------------------------------------

/// Which identity the cached state belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateOwner {
    pub external_user_id: Option<String>,
    pub device_id: String,
}

// ----------------------------------------------------------------------------
// State Store
// ----------------------------------------------------------------------------

/// Store of the synced user, event-count, and campaign collections
#[derive(Default)]
pub struct StateStore {
    user: RwLock<UserData>,
    events: RwLock<EventCounts>,
    campaigns: RwLock<Vec<Campaign>>,
    owner: RwLock<Option<StateOwner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub async fn user_data(&self) -> UserData {
        self.user.read().await.clone()
    }

    pub async fn event_counts(&self) -> EventCounts {
        self.events.read().await.clone()
    }

    pub async fn campaigns(&self) -> Vec<Campaign> {
        self.campaigns.read().await.clone()
    }

    pub async fn owner(&self) -> Option<StateOwner> {
        self.owner.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Local Mutation
    // ------------------------------------------------------------------

    /// Record one occurrence of a tracked event
    pub async fn increment_event(
        &self,
        name: &str,
        params: Option<&EventParams>,
        segmentation_param_keys: Option<&[String]>,
        date: chrono::NaiveDate,
    ) {
        self.events
            .write()
            .await
            .increment_event(name, params, segmentation_param_keys, date);
    }

    /// Set user properties locally, new values winning
    pub async fn set_user_properties(&self, props: HashMap<String, Value>, now_secs: i64) {
        self.user.write().await.set_properties(props, now_secs);
    }

    /// Record a campaign's re-eligibility cool-down
    pub async fn hide_campaign_until(&self, id: CampaignId, until_secs: i64) {
        self.user.write().await.hide_campaign_until(id, until_secs);
    }

    /// Drop user and event state (identity removal)
    pub async fn clear_user_state(&self) {
        *self.user.write().await = UserData::default();
        self.events.write().await.clear();
        debug!("cleared cached user and event state");
    }

    // ------------------------------------------------------------------
    // Sync Application
    // ------------------------------------------------------------------

    /// Merge a freshly synced user record per strategy
    pub async fn merge_user_data(&self, incoming: UserData, strategy: MergeStrategy) {
        let mut user = self.user.write().await;
        match strategy {
            MergeStrategy::Merge => user.merge_from(incoming),
            MergeStrategy::Replace => *user = incoming,
        }
    }

    /// Merge freshly synced event counts per strategy; merged counts always
    /// sum, never overwrite
    pub async fn merge_event_counts(&self, incoming: EventCounts, strategy: MergeStrategy) {
        let mut events = self.events.write().await;
        match strategy {
            MergeStrategy::Merge => events.merge_from(incoming),
            MergeStrategy::Replace => *events = incoming,
        }
    }

    /// Replace the cached campaign set wholesale
    pub async fn replace_campaigns(&self, incoming: Vec<Campaign>) {
        *self.campaigns.write().await = incoming;
    }

    /// Apply a successful sync result and return the post-application user
    /// snapshot
    pub async fn apply_sync(
        &self,
        snapshot: StateSnapshot,
        post: PostProcessConfig,
        owner: StateOwner,
    ) -> UserData {
        let strategy = post.strategy();

        if let Some(user) = snapshot.user_data {
            self.merge_user_data(user, strategy).await;
        }
        if let Some(counts) = snapshot.event_counts {
            self.merge_event_counts(counts, strategy).await;
        }
        if let Some(campaigns) = snapshot.campaigns {
            debug!(count = campaigns.len(), "replacing cached campaigns");
            self.replace_campaigns(campaigns).await;
        }
        if post.clear {
            self.clear_user_state().await;
        }

        *self.owner.write().await = Some(owner);
        self.user_data().await
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
