//! Cached user state
//!
//! Holds the per-user property map and campaign visibility bookkeeping kept
//! in sync with the server. Merge semantics are property-level "new wins":
//! values from a fresh sync override previously cached ones, while immutable
//! identity metadata prefers whichever side has it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::CampaignId;

/// Sentinel `campaign_hidden_until` value meaning "hidden forever"
pub const HIDE_FOREVER: i64 = -1;

// ----------------------------------------------------------------------------
// User Data
// ----------------------------------------------------------------------------

/// Locally cached user state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    /// Free-form user properties
    #[serde(default)]
    pub properties: HashMap<String, Value>,

    /// Per-campaign visibility cool-down: campaign id → epoch seconds until
    /// which the campaign stays hidden, or [`HIDE_FOREVER`]
    #[serde(default)]
    pub campaign_hidden_until: HashMap<CampaignId, i64>,

    /// Platform the user record was created on
    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default)]
    pub created_at: Option<i64>,

    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl UserData {
    /// Merge a freshly synced record into this one, the incoming side winning
    /// at the property level
    pub fn merge_from(&mut self, incoming: UserData) {
        self.properties.extend(incoming.properties);
        self.campaign_hidden_until
            .extend(incoming.campaign_hidden_until);
        // Platform is immutable identity metadata: prefer whichever side
        // has it, incoming first.
        if incoming.platform.is_some() {
            self.platform = incoming.platform;
        }
        if self.created_at.is_none() {
            self.created_at = incoming.created_at;
        }
        if incoming.updated_at.is_some() {
            self.updated_at = incoming.updated_at;
        }
    }

    /// Set user properties locally, new values winning over cached ones
    pub fn set_properties(&mut self, props: HashMap<String, Value>, now_secs: i64) {
        self.properties.extend(props);
        self.updated_at = Some(now_secs);
    }

    /// Record that a campaign must stay hidden until the given epoch second
    /// (or forever, for the sentinel)
    pub fn hide_campaign_until(&mut self, id: CampaignId, until_secs: i64) {
        self.campaign_hidden_until.insert(id, until_secs);
    }

    /// Whether the campaign is still inside its re-eligibility cool-down
    pub fn is_campaign_hidden(&self, id: &CampaignId, now_secs: i64) -> bool {
        match self.campaign_hidden_until.get(id) {
            Some(&until) => until == HIDE_FOREVER || until > now_secs,
            None => false,
        }
    }

    /// Whether a per-template suppression flag is still active
    ///
    /// The flag lives in the property map under
    /// `hide_in_app_message_<template>` and suppresses when it is a truthy
    /// boolean, a future epoch-second value, or the forever sentinel.
    pub fn is_template_suppressed(&self, template_name: &str, now_secs: i64) -> bool {
        let key = format!("hide_in_app_message_{template_name}");
        match self.properties.get(&key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(until) => until == HIDE_FOREVER || until > now_secs,
                None => false,
            },
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
