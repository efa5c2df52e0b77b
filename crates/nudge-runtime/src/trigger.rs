//! Trigger evaluation and dispatch
//!
//! On each tracked event the engine filters the cached campaigns down to
//! the eligible ones, orders them by server-side recency, and schedules
//! each for display after its configured delay. Display-time re-checks run
//! against fresh state: re-eligibility cool-downs, per-template
//! suppression, and the global single-open gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use nudge_core::segmentation::{self, EvalContext, IdentitySnapshot};
use nudge_core::{Campaign, CampaignId, EventParams, TimeSource};

use crate::state::StateStore;
use crate::traits::Presenter;

// ----------------------------------------------------------------------------
// Trigger Engine
// ----------------------------------------------------------------------------

/// Filters, orders, and dispatches eligible campaigns
#[derive(Clone)]
pub struct TriggerEngine {
    store: Arc<StateStore>,
    presenter: Arc<dyn Presenter>,
    time: Arc<dyn TimeSource>,
    /// Global "one in-app message open at a time" gate
    message_open: Arc<AtomicBool>,
}

impl TriggerEngine {
    pub fn new(
        store: Arc<StateStore>,
        presenter: Arc<dyn Presenter>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            store,
            presenter,
            time,
            message_open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clear the single-open gate once the host dismissed the modal
    pub fn message_dismissed(&self) {
        self.message_open.store(false, Ordering::SeqCst);
    }

    /// Campaigns eligible for this event, in dispatch priority order
    /// (most recently updated first)
    pub async fn eligible_campaigns(
        &self,
        event_name: &str,
        params: Option<&EventParams>,
        identity: &IdentitySnapshot,
    ) -> Vec<Campaign> {
        let now = self.time.now();
        let now_secs = now.as_secs();
        let user = self.store.user_data().await;
        let counts = self.store.event_counts().await;
        let campaigns = self.store.campaigns().await;

        let ctx = EvalContext {
            user: &user,
            counts: &counts,
            event_params: params,
            identity,
            today: now.date_utc(),
        };

        let mut survivors: Vec<Campaign> = campaigns
            .into_iter()
            .filter(|campaign| {
                campaign.is_active_at(now_secs)
                    && campaign.triggering_event == event_name
                    && campaign.matches_event_params(params)
                    && segmentation::is_eligible(campaign, &ctx)
            })
            .collect();

        survivors.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        survivors
    }

    /// Evaluate a tracked event and schedule every surviving campaign
    pub async fn handle_event(
        &self,
        event_name: &str,
        params: Option<&EventParams>,
        identity: &IdentitySnapshot,
    ) {
        let survivors = self.eligible_campaigns(event_name, params, identity).await;
        if survivors.is_empty() {
            return;
        }
        debug!(
            event = event_name,
            count = survivors.len(),
            "scheduling eligible campaigns"
        );
        for campaign in survivors {
            self.schedule_display(campaign);
        }
    }

    fn schedule_display(&self, campaign: Campaign) {
        let engine = self.clone();
        tokio::spawn(async move {
            if campaign.delay > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(campaign.delay)).await;
            }
            engine.display(campaign).await;
        });
    }

    /// Display-time re-checks against fresh state, then presentation
    async fn display(&self, campaign: Campaign) {
        let now_secs = self.time.now().as_secs();
        let user = self.store.user_data().await;

        if user.is_campaign_hidden(&campaign.id, now_secs) {
            debug!(campaign = %campaign.id, "still inside re-eligibility cool-down, skipping");
            return;
        }
        if user.is_template_suppressed(&campaign.modal.template_name, now_secs) {
            debug!(
                campaign = %campaign.id,
                template = %campaign.modal.template_name,
                "template suppressed for this user, skipping"
            );
            return;
        }
        // Never queue behind an open message; skip outright.
        if self.message_open.swap(true, Ordering::SeqCst) {
            info!(campaign = %campaign.id, "an in-app message is already open, skipping");
            return;
        }

        self.presenter.present(&campaign.id, &campaign.modal);
        self.record_display(&campaign, now_secs).await;
    }

    async fn record_display(&self, campaign: &Campaign, now_secs: i64) {
        let Some(re_eligibility) = &campaign.re_eligibility else {
            return;
        };
        match re_eligibility.calculate_hide_until(now_secs) {
            Some(until) => {
                self.store
                    .hide_campaign_until(campaign.id.clone(), until)
                    .await;
            }
            None => debug!(
                campaign = %campaign.id,
                "unusable re-eligibility spec, no cool-down recorded"
            ),
        }
    }
}

/// Identifiers of campaigns a hypothetical event would dispatch, for
/// inspection and tests
pub fn campaign_ids(campaigns: &[Campaign]) -> Vec<CampaignId> {
    campaigns.iter().map(|campaign| campaign.id.clone()).collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
