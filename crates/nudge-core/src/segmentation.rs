//! Segmentation rules evaluation
//!
//! Decides campaign eligibility from a two-level boolean expression: groups
//! combined by OR, conditions within a group combined by AND. Conditions
//! compare user attributes or event counts. Evaluation fails closed: unknown
//! segment types, operators, or value coercion failures make the affected
//! expression ineligible rather than eligible.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::campaign::Campaign;
use crate::event_counts::EventCounts;
use crate::types::EventParams;
use crate::user_data::UserData;

// ----------------------------------------------------------------------------
// Segment Expression Types
// ----------------------------------------------------------------------------

/// Kind of segment attached to a campaign; only condition-based segments are
/// evaluable
///
/// Unrecognized wire values decode to `Unknown` so they fail closed at
/// evaluation time instead of dropping the campaign at parse time; the
/// other operator enums below follow the same rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SegmentType {
    #[default]
    Condition,
    Unknown,
}

impl From<String> for SegmentType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "condition" => Self::Condition,
            _ => Self::Unknown,
        }
    }
}

impl From<SegmentType> for String {
    fn from(value: SegmentType) -> Self {
        match value {
            SegmentType::Condition => "condition",
            SegmentType::Unknown => "unknown",
        }
        .to_string()
    }
}

/// Operator combining the groups of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GroupOperator {
    Or,
    Unknown,
}

impl From<String> for GroupOperator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OR" => Self::Or,
            _ => Self::Unknown,
        }
    }
}

impl From<GroupOperator> for String {
    fn from(value: GroupOperator) -> Self {
        match value {
            GroupOperator::Or => "OR",
            GroupOperator::Unknown => "unknown",
        }
        .to_string()
    }
}

/// Operator combining the conditions of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    And,
    Unknown,
}

impl From<String> for ConditionOperator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "AND" => Self::And,
            _ => Self::Unknown,
        }
    }
}

impl From<ConditionOperator> for String {
    fn from(value: ConditionOperator) -> Self {
        match value {
            ConditionOperator::And => "AND",
            ConditionOperator::Unknown => "unknown",
        }
        .to_string()
    }
}

/// Declared type of a condition's comparison value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueType {
    #[default]
    Text,
    Int,
    Bool,
    Array,
    Unknown,
}

impl From<String> for ValueType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "TEXT" => Self::Text,
            "INT" => Self::Int,
            "BOOL" => Self::Bool,
            "ARRAY" => Self::Array,
            _ => Self::Unknown,
        }
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Text => "TEXT",
            ValueType::Int => "INT",
            ValueType::Bool => "BOOL",
            ValueType::Array => "ARRAY",
            ValueType::Unknown => "unknown",
        }
        .to_string()
    }
}

/// Comparison operator of a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Comparator {
    Eq,
    Ne,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    IsNotNull,
    Unknown,
}

impl From<String> for Comparator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "=" => Self::Eq,
            "<>" => Self::Ne,
            "contains" => Self::Contains,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            "is_null" => Self::IsNull,
            "is_not_null" => Self::IsNotNull,
            _ => Self::Unknown,
        }
    }
}

impl From<Comparator> for String {
    fn from(value: Comparator) -> Self {
        match value {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Contains => "contains",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::IsNull => "is_null",
            Comparator::IsNotNull => "is_not_null",
            Comparator::Unknown => "unknown",
        }
        .to_string()
    }
}

/// Attribute comparison against a configured value or an incoming event
/// parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCondition {
    pub attribute: String,
    pub operator: Comparator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub value_type: ValueType,
    /// When set, the right-hand value is taken from the incoming event's
    /// parameters instead of `value`
    #[serde(default)]
    pub event_param_key: Option<String>,
}

/// Count-threshold comparison over aggregated event counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCondition {
    pub event: String,
    pub operator: Comparator,
    pub value: i64,
    /// When set, only counts from the last N days are considered
    #[serde(default)]
    pub num_days: Option<i64>,
}

/// One leaf of the segment expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum Condition {
    User(UserCondition),
    Event(EventCondition),
    #[serde(other)]
    Unknown,
}

/// Conditions combined by the group's operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_operator: Option<ConditionOperator>,
}

/// The full eligibility expression attached to a campaign
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    #[serde(default)]
    pub segment_type: SegmentType,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub group_operator: Option<GroupOperator>,
}

// ----------------------------------------------------------------------------
// Evaluation Context
// ----------------------------------------------------------------------------

/// Identity attributes resolvable in user conditions alongside the property
/// map
#[derive(Debug, Clone, Default)]
pub struct IdentitySnapshot {
    pub external_user_id: Option<String>,
    pub device_id: String,
    pub platform: String,
}

/// State snapshot a segment is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub user: &'a UserData,
    pub counts: &'a EventCounts,
    pub event_params: Option<&'a EventParams>,
    pub identity: &'a IdentitySnapshot,
    /// Today's UTC date, anchoring "last N days" windows
    pub today: NaiveDate,
}

// ----------------------------------------------------------------------------
// Evaluator
// ----------------------------------------------------------------------------

/// Whether the campaign's segment admits the current user and event
pub fn is_eligible(campaign: &Campaign, ctx: &EvalContext) -> bool {
    if campaign.testing {
        let allowed = ctx
            .identity
            .external_user_id
            .as_ref()
            .is_some_and(|id| campaign.whitelist.iter().any(|w| w == id));
        if !allowed {
            return false;
        }
    }

    let segment = &campaign.segment;
    if segment.segment_type != SegmentType::Condition {
        return false;
    }

    // No groups and no operator targets all users.
    if segment.groups.is_empty() && segment.group_operator.is_none() {
        return true;
    }
    if segment.group_operator != Some(GroupOperator::Or) {
        return false;
    }

    segment.groups.iter().any(|group| group_passes(group, ctx))
}

fn group_passes(group: &Group, ctx: &EvalContext) -> bool {
    if group.condition_operator != Some(ConditionOperator::And) {
        return false;
    }
    group
        .conditions
        .iter()
        .all(|condition| condition_passes(condition, ctx))
}

fn condition_passes(condition: &Condition, ctx: &EvalContext) -> bool {
    match condition {
        Condition::User(user) => user_condition_passes(user, ctx),
        Condition::Event(event) => event_condition_passes(event, ctx),
        Condition::Unknown => false,
    }
}

// ----------------------------------------------------------------------------
// User-Based Conditions
// ----------------------------------------------------------------------------

fn resolve_attribute(attribute: &str, ctx: &EvalContext) -> Option<Value> {
    match attribute {
        "external_user_id" => ctx
            .identity
            .external_user_id
            .as_ref()
            .map(|id| Value::String(id.clone())),
        "device_id" => Some(Value::String(ctx.identity.device_id.clone())),
        "platform" => Some(Value::String(ctx.identity.platform.clone())),
        _ => ctx.user.properties.get(attribute).cloned(),
    }
}

fn user_condition_passes(condition: &UserCondition, ctx: &EvalContext) -> bool {
    let lhs = resolve_attribute(&condition.attribute, ctx);

    match condition.operator {
        Comparator::IsNull => return lhs.map_or(true, |v| v.is_null()),
        Comparator::IsNotNull => return lhs.map_or(false, |v| !v.is_null()),
        Comparator::Unknown => return false,
        _ => {}
    }

    let lhs = match lhs {
        Some(v) if !v.is_null() => v,
        _ => return false,
    };

    let rhs = match &condition.event_param_key {
        Some(key) => match ctx.event_params.and_then(|p| p.get(key)) {
            Some(v) => v.clone(),
            None => return false,
        },
        None => condition.value.clone(),
    };

    compare_values(&lhs, &rhs, condition.operator, condition.value_type)
}

fn compare_values(lhs: &Value, rhs: &Value, op: Comparator, value_type: ValueType) -> bool {
    match value_type {
        ValueType::Text => {
            let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) else {
                return false;
            };
            match op {
                Comparator::Eq => a == b,
                Comparator::Ne => a != b,
                Comparator::Gt => a > b,
                Comparator::Gte => a >= b,
                Comparator::Lt => a < b,
                Comparator::Lte => a <= b,
                _ => false,
            }
        }
        ValueType::Int => {
            let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) else {
                return false;
            };
            compare_ints(a, b, op)
        }
        ValueType::Bool => {
            let (Some(a), Some(b)) = (lhs.as_bool(), rhs.as_bool()) else {
                return false;
            };
            match op {
                Comparator::Eq => a == b,
                Comparator::Ne => a != b,
                _ => false,
            }
        }
        ValueType::Array => {
            if op != Comparator::Contains {
                return false;
            }
            // Membership in whichever side is the array.
            match (lhs.as_array(), rhs.as_array()) {
                (_, Some(members)) => members.contains(lhs),
                (Some(members), None) => members.contains(rhs),
                (None, None) => false,
            }
        }
        ValueType::Unknown => false,
    }
}

fn compare_ints(a: i64, b: i64, op: Comparator) -> bool {
    match op {
        Comparator::Eq => a == b,
        Comparator::Ne => a != b,
        Comparator::Gt => a > b,
        Comparator::Gte => a >= b,
        Comparator::Lt => a < b,
        Comparator::Lte => a <= b,
        _ => false,
    }
}

// ----------------------------------------------------------------------------
// Event-Based Conditions
// ----------------------------------------------------------------------------

fn event_condition_passes(condition: &EventCondition, ctx: &EvalContext) -> bool {
    let since = match condition.num_days {
        None => None,
        Some(days) if days < 0 => return false,
        Some(days) => match ctx.today.checked_sub_days(Days::new(days as u64)) {
            Some(date) => Some(date),
            None => return false,
        },
    };

    let count = ctx.counts.count_since(&condition.event, since);
    if count < 0 {
        return false;
    }

    compare_ints(count, condition.value, condition.operator)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
