//! Event-count aggregation
//!
//! Maintains the per-key rolling counts of tracked events ("event
//! intermediate counts"). A key is the event name plus the UTC calendar
//! date, optionally refined by a single segmentation parameter pair. Counts
//! only ever grow: local tracking increments them and sync results merge in
//! by summation, never by overwrite.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::types::EventParams;

/// Sentinel returned by [`EventCounts::count_since`] on an internal invariant
/// violation; evaluators treat any negative count as condition-failed.
pub const COUNT_INVALID: i64 = -1;

// ----------------------------------------------------------------------------
// Count Key
// ----------------------------------------------------------------------------

/// Composite key identifying one intermediate count
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventCountKey {
    /// Tracked event name
    pub name: String,
    /// UTC calendar date the events were counted on
    pub date: NaiveDate,
    /// Optional segmentation parameter pair refining the key
    pub param: Option<(String, String)>,
}

impl EventCountKey {
    /// Key for an event with no segmentation parameter
    pub fn plain(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            date,
            param: None,
        }
    }

    /// Derive the key for a tracked event
    ///
    /// Only the first configured segmentation parameter key is consulted,
    /// and only when the event carries a string value for it; multi-key
    /// segmentation is unsupported.
    pub fn for_event(
        name: &str,
        params: Option<&EventParams>,
        segmentation_param_keys: Option<&[String]>,
        date: NaiveDate,
    ) -> Self {
        let param = segmentation_param_keys
            .and_then(|keys| keys.first())
            .and_then(|key| {
                let value = params?.get(key)?.as_str()?;
                Some((key.clone(), value.to_string()))
            });

        Self {
            name: name.to_string(),
            date,
            param,
        }
    }
}

// ----------------------------------------------------------------------------
// Event Counts
// ----------------------------------------------------------------------------

/// Collection of intermediate counts, keyed by event/date/parameter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventCounts {
    counts: HashMap<EventCountKey, u32>,
}

impl EventCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of a tracked event
    pub fn increment_event(
        &mut self,
        name: &str,
        params: Option<&EventParams>,
        segmentation_param_keys: Option<&[String]>,
        date: NaiveDate,
    ) {
        let key = EventCountKey::for_event(name, params, segmentation_param_keys, date);
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Sum the counts recorded for an event, optionally restricted to dates
    /// on or after `since`
    ///
    /// Returns 0 when nothing matches and [`COUNT_INVALID`] only if the
    /// summation itself overflows.
    pub fn count_since(&self, event_name: &str, since: Option<NaiveDate>) -> i64 {
        let mut total: i64 = 0;
        for (key, &count) in &self.counts {
            if key.name != event_name {
                continue;
            }
            if let Some(since) = since {
                if key.date < since {
                    continue;
                }
            }
            total = match total.checked_add(count as i64) {
                Some(t) => t,
                None => return COUNT_INVALID,
            };
        }
        total
    }

    /// Merge another collection in, summing counts for shared keys
    pub fn merge_from(&mut self, incoming: EventCounts) {
        for (key, count) in incoming.counts {
            let entry = self.counts.entry(key).or_insert(0);
            *entry = entry.saturating_add(count);
        }
    }

    /// Insert or sum a single keyed count
    pub fn add(&mut self, key: EventCountKey, count: u32) {
        let entry = self.counts.entry(key).or_insert(0);
        *entry = entry.saturating_add(count);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Look up one count by exact key
    pub fn get(&self, key: &EventCountKey) -> Option<u32> {
        self.counts.get(key).copied()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

// ----------------------------------------------------------------------------
// Wire Decoding
// ----------------------------------------------------------------------------

/// Wire shape of one synced intermediate count entry
#[derive(Debug, Deserialize)]
struct EventCountEntry {
    name: String,
    dt: String,
    count: u32,
    #[serde(default)]
    event_params: Option<HashMap<String, Value>>,
}

/// Decode the synced count array, dropping malformed entries per-item
pub fn decode_event_counts(entries: &[Value]) -> EventCounts {
    let mut counts = EventCounts::new();
    for entry in entries {
        match decode_entry(entry) {
            Some((key, count)) => counts.add(key, count),
            None => warn!(entry = %entry, "dropping malformed event count entry"),
        }
    }
    counts
}

fn decode_entry(value: &Value) -> Option<(EventCountKey, u32)> {
    let entry: EventCountEntry = serde_json::from_value(value.clone()).ok()?;
    let date = NaiveDate::parse_from_str(&entry.dt, "%Y-%m-%d").ok()?;

    // At most one segmentation parameter pair per key; anything else is a
    // malformed entry.
    let param = match entry.event_params {
        None => None,
        Some(map) if map.is_empty() => None,
        Some(map) if map.len() == 1 => {
            let (k, v) = map.into_iter().next()?;
            Some((k, v.as_str()?.to_string()))
        }
        Some(_) => return None,
    };

    Some((
        EventCountKey {
            name: entry.name,
            date,
            param,
        },
        entry.count,
    ))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_triple_increment_yields_single_key_count_three() {
        let mut counts = EventCounts::new();
        for _ in 0..3 {
            counts.increment_event("e", None, None, day(1));
        }

        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(&EventCountKey::plain("e", day(1))), Some(3));
        assert_eq!(counts.count_since("e", None), 3);
    }

    #[test]
    fn test_first_segmentation_key_only() {
        let params: EventParams = [
            ("plan".to_string(), json!("pro")),
            ("tier".to_string(), json!("gold")),
        ]
        .into_iter()
        .collect();
        let keys = vec!["plan".to_string(), "tier".to_string()];

        let mut counts = EventCounts::new();
        counts.increment_event("upgrade", Some(&params), Some(&keys), day(1));

        let expected = EventCountKey {
            name: "upgrade".to_string(),
            date: day(1),
            param: Some(("plan".to_string(), "pro".to_string())),
        };
        assert_eq!(counts.get(&expected), Some(1));
    }

    #[test]
    fn test_non_string_param_value_falls_back_to_plain_key() {
        let params: EventParams = [("plan".to_string(), json!(7))].into_iter().collect();
        let keys = vec!["plan".to_string()];

        let mut counts = EventCounts::new();
        counts.increment_event("upgrade", Some(&params), Some(&keys), day(1));

        assert_eq!(counts.get(&EventCountKey::plain("upgrade", day(1))), Some(1));
    }

    #[test]
    fn test_merge_sums_shared_keys() {
        let mut a = EventCounts::new();
        a.add(EventCountKey::plain("e", day(1)), 1);

        let mut b = EventCounts::new();
        b.add(EventCountKey::plain("e", day(1)), 2);
        b.add(EventCountKey::plain("other", day(2)), 5);

        a.merge_from(b);
        assert_eq!(a.get(&EventCountKey::plain("e", day(1))), Some(3));
        assert_eq!(a.get(&EventCountKey::plain("other", day(2))), Some(5));
    }

    #[test]
    fn test_count_since_windows_by_date() {
        let mut counts = EventCounts::new();
        counts.add(EventCountKey::plain("e", day(1)), 2);
        counts.add(EventCountKey::plain("e", day(5)), 3);
        counts.add(EventCountKey::plain("e", day(10)), 4);

        assert_eq!(counts.count_since("e", None), 9);
        assert_eq!(counts.count_since("e", Some(day(5))), 7);
        assert_eq!(counts.count_since("e", Some(day(11))), 0);
        assert_eq!(counts.count_since("missing", None), 0);
    }

    #[test]
    fn test_decode_drops_malformed_entries() {
        let entries = vec![
            json!({"name": "e", "dt": "2024-06-01", "count": 2}),
            json!({"name": "e", "dt": "not-a-date", "count": 2}),
            json!({"name": "e", "dt": "2024-06-01", "count": 1,
                   "event_params": {"plan": "pro"}}),
            json!({"name": "e", "dt": "2024-06-01", "count": 1,
                   "event_params": {"a": "x", "b": "y"}}),
            json!("garbage"),
        ];

        let counts = decode_event_counts(&entries);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get(&EventCountKey::plain("e", day(1))), Some(2));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // However increments are interleaved across names, each name's
            // total equals the number of increments it received.
            #[test]
            fn count_matches_increments(names in proptest::collection::vec(0u8..3, 1..40)) {
                let mut counts = EventCounts::new();
                for n in &names {
                    counts.increment_event(&format!("e{n}"), None, None, day(1));
                }
                for n in 0u8..3 {
                    let expected = names.iter().filter(|&&x| x == n).count() as i64;
                    prop_assert_eq!(counts.count_since(&format!("e{n}"), None), expected);
                }
            }

            // Merging is order-insensitive: a ∪ b and b ∪ a agree on totals.
            #[test]
            fn merge_is_commutative_on_totals(
                a in proptest::collection::vec((0u8..3, 1u32..10), 0..10),
                b in proptest::collection::vec((0u8..3, 1u32..10), 0..10),
            ) {
                let build = |entries: &[(u8, u32)]| {
                    let mut c = EventCounts::new();
                    for (n, count) in entries {
                        c.add(EventCountKey::plain(format!("e{n}"), day(1)), *count);
                    }
                    c
                };

                let mut ab = build(&a);
                ab.merge_from(build(&b));
                let mut ba = build(&b);
                ba.merge_from(build(&a));

                for n in 0u8..3 {
                    prop_assert_eq!(
                        ab.count_since(&format!("e{n}"), None),
                        ba.count_since(&format!("e{n}"), None)
                    );
                }
            }
        }
    }
}
