//! Campaign model and wire decoding
//!
//! Campaigns are immutable snapshot entities constructed only from validated
//! server payloads. Decoding is strict at the boundary: malformed or
//! inactive campaigns are dropped per-item and never partially constructed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::segmentation::SegmentInfo;
use crate::types::{CampaignId, EventParams};
use crate::user_data::HIDE_FOREVER;

// ----------------------------------------------------------------------------
// Modal Content Reference
// ----------------------------------------------------------------------------

/// Reference to the modal content a campaign displays
///
/// The engine never interprets the payload; it is handed verbatim to the
/// presenter collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalSpec {
    pub template_name: String,
    #[serde(default)]
    pub payload: Value,
}

// ----------------------------------------------------------------------------
// Re-Eligibility Cool-Down
// ----------------------------------------------------------------------------

/// Unit of a re-eligibility cool-down spec; unrecognized wire values decode
/// to `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CooldownUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Infinite,
    Unknown,
}

impl From<String> for CooldownUnit {
    fn from(s: String) -> Self {
        match s.as_str() {
            "h" => Self::Hours,
            "d" => Self::Days,
            "w" => Self::Weeks,
            "m" => Self::Months,
            "infinite" => Self::Infinite,
            _ => Self::Unknown,
        }
    }
}

impl From<CooldownUnit> for String {
    fn from(value: CooldownUnit) -> Self {
        match value {
            CooldownUnit::Hours => "h",
            CooldownUnit::Days => "d",
            CooldownUnit::Weeks => "w",
            CooldownUnit::Months => "m",
            CooldownUnit::Infinite => "infinite",
            CooldownUnit::Unknown => "unknown",
        }
        .to_string()
    }
}

/// How long after a display the user stays ineligible for the campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReEligibility {
    pub unit: CooldownUnit,
    pub value: i64,
}

impl ReEligibility {
    /// Compute the epoch second until which the campaign stays hidden
    ///
    /// `Infinite` yields the forever sentinel regardless of value. Unknown
    /// units and negative values yield `None` (no hide recorded).
    pub fn calculate_hide_until(&self, now_secs: i64) -> Option<i64> {
        let unit_secs: i64 = match self.unit {
            CooldownUnit::Hours => 3_600,
            CooldownUnit::Days => 86_400,
            CooldownUnit::Weeks => 604_800,
            CooldownUnit::Months => 2_592_000,
            CooldownUnit::Infinite => return Some(HIDE_FOREVER),
            CooldownUnit::Unknown => return None,
        };
        if self.value < 0 {
            return None;
        }
        Some(now_secs + self.value * unit_secs)
    }
}

// ----------------------------------------------------------------------------
// Campaign
// ----------------------------------------------------------------------------

/// A configured in-app-message trigger rule
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    /// Event name whose tracking triggers this campaign
    pub triggering_event: String,
    /// Lifecycle window start, epoch seconds
    pub start: i64,
    /// Optional lifecycle window end, epoch seconds
    pub end: Option<i64>,
    /// Seconds to wait between triggering and display
    pub delay: u64,
    /// Event-parameter filters; the tracked event must fully match at least
    /// one map (empty list matches everything)
    pub event_param_filters: Vec<HashMap<String, Value>>,
    /// Segmentation rule deciding user eligibility
    pub segment: SegmentInfo,
    /// Testing campaigns are visible only to allow-listed users
    pub testing: bool,
    pub whitelist: Vec<String>,
    /// Optional re-eligibility cool-down applied after a display
    pub re_eligibility: Option<ReEligibility>,
    /// Modal content handed to the presenter
    pub modal: ModalSpec,
    /// Server-side modification time, used for trigger priority ordering
    pub updated_at: i64,
}

impl Campaign {
    /// Whether the lifecycle window contains the given instant
    pub fn is_active_at(&self, now_secs: i64) -> bool {
        self.start <= now_secs && self.end.map_or(true, |end| now_secs < end)
    }

    /// Whether the event parameters satisfy the campaign's filters
    pub fn matches_event_params(&self, params: Option<&EventParams>) -> bool {
        if self.event_param_filters.is_empty() {
            return true;
        }
        self.event_param_filters.iter().any(|filter| {
            filter.iter().all(|(key, expected)| {
                params.and_then(|p| p.get(key)) == Some(expected)
            })
        })
    }
}

// ----------------------------------------------------------------------------
// Wire Decoding
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CampaignWire {
    id: String,
    status: String,
    triggering_event: String,
    campaign_start: i64,
    #[serde(default)]
    campaign_end: Option<i64>,
    #[serde(default)]
    delay: u64,
    #[serde(default)]
    event_param_filters: Vec<HashMap<String, Value>>,
    #[serde(default)]
    segment_info: SegmentInfo,
    #[serde(default)]
    testing: bool,
    #[serde(default)]
    whitelist: Vec<String>,
    #[serde(default)]
    re_eligible_condition: Option<ReEligibility>,
    message: ModalSpec,
    #[serde(default)]
    updated_at: i64,
}

fn decode_campaign(value: &Value) -> Result<Campaign, String> {
    let wire: CampaignWire =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    if wire.status != "active" {
        return Err(format!("status is {:?}, not active", wire.status));
    }
    if wire.id.is_empty() {
        return Err("empty campaign id".to_string());
    }
    if wire.triggering_event.is_empty() {
        return Err("empty triggering event".to_string());
    }

    Ok(Campaign {
        id: CampaignId::new(wire.id),
        triggering_event: wire.triggering_event,
        start: wire.campaign_start,
        end: wire.campaign_end,
        delay: wire.delay,
        event_param_filters: wire.event_param_filters,
        segment: wire.segment_info,
        testing: wire.testing,
        whitelist: wire.whitelist,
        re_eligibility: wire.re_eligible_condition,
        modal: wire.message,
        updated_at: wire.updated_at,
    })
}

/// Decode a synced campaign array, dropping malformed or inactive entries
/// per-item
pub fn decode_campaigns(values: &[Value]) -> Vec<Campaign> {
    values
        .iter()
        .filter_map(|value| match decode_campaign(value) {
            Ok(campaign) => Some(campaign),
            Err(reason) => {
                warn!(%reason, "dropping campaign from sync payload");
                None
            }
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire_campaign(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "status": status,
            "triggering_event": "purchase",
            "campaign_start": 1_000,
            "message": {"template_name": "welcome"},
            "updated_at": 42
        })
    }

    #[test]
    fn test_decode_keeps_active_drops_rest() {
        let values = vec![
            wire_campaign("c1", "active"),
            wire_campaign("c2", "draft"),
            wire_campaign("", "active"),
            json!({"not": "a campaign"}),
        ];

        let campaigns = decode_campaigns(&values);
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].id.as_str(), "c1");
        assert_eq!(campaigns[0].updated_at, 42);
    }

    #[test]
    fn test_activity_window() {
        let mut c = decode_campaigns(&[wire_campaign("c1", "active")])
            .pop()
            .unwrap();
        assert!(!c.is_active_at(999));
        assert!(c.is_active_at(1_000));

        c.end = Some(2_000);
        assert!(c.is_active_at(1_999));
        assert!(!c.is_active_at(2_000));
    }

    #[test]
    fn test_event_param_filters_or_of_ands() {
        let mut c = decode_campaigns(&[wire_campaign("c1", "active")])
            .pop()
            .unwrap();
        c.event_param_filters = vec![
            [("plan".to_string(), json!("pro")), ("seat".to_string(), json!(2))]
                .into_iter()
                .collect(),
            [("vip".to_string(), json!(true))].into_iter().collect(),
        ];

        let matching: EventParams =
            [("vip".to_string(), json!(true))].into_iter().collect();
        let partial: EventParams =
            [("plan".to_string(), json!("pro"))].into_iter().collect();

        assert!(c.matches_event_params(Some(&matching)));
        assert!(!c.matches_event_params(Some(&partial)));
        assert!(!c.matches_event_params(None));
    }

    #[test]
    fn test_calculate_hide_until() {
        let three_days = ReEligibility {
            unit: CooldownUnit::Days,
            value: 3,
        };
        assert_eq!(three_days.calculate_hide_until(100), Some(100 + 3 * 86_400));

        let forever = ReEligibility {
            unit: CooldownUnit::Infinite,
            value: 7,
        };
        assert_eq!(forever.calculate_hide_until(100), Some(HIDE_FOREVER));

        let unknown: ReEligibility =
            serde_json::from_value(json!({"unit": "fortnight", "value": 1})).unwrap();
        assert_eq!(unknown.unit, CooldownUnit::Unknown);
        assert_eq!(unknown.calculate_hide_until(100), None);
    }
}
