//! Conditions gating `dataChange` interactions.
//!
//! Comparisons are loose in the way dashboard authors expect: `"42"`
//! equals `42`, ordering operators compare numerically, and the substring
//! operators compare text forms.

use crate::event::EventPayload;
use cardwire_core::value::{to_number, to_text, values_equal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    /// Loosely equal.
    Equals,
    /// Not loosely equal.
    NotEquals,
    /// Numerically greater.
    GreaterThan,
    /// Numerically smaller.
    LessThan,
    /// Numerically greater or equal.
    GreaterThanOrEqual,
    /// Numerically smaller or equal.
    LessThanOrEqual,
    /// Text contains.
    Contains,
    /// Text starts with.
    StartsWith,
    /// Text ends with.
    EndsWith,
    /// Numerically within `min_value..=max_value`.
    Between,
}

/// A condition on a changed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Property the change must concern. `None` accepts any property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Operator.
    pub operator: ConditionOperator,
    /// Operand for the binary operators.
    #[serde(default)]
    pub value: Value,
    /// Lower bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Value>,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Value>,
}

impl Condition {
    /// Condition `operator value` on any property.
    #[must_use]
    pub const fn new(operator: ConditionOperator, value: Value) -> Self {
        Self {
            property: None,
            operator,
            value,
            min_value: None,
            max_value: None,
        }
    }

    /// Condition `min <= x <= max`.
    #[must_use]
    pub const fn between(min: Value, max: Value) -> Self {
        Self {
            property: None,
            operator: ConditionOperator::Between,
            value: Value::Null,
            min_value: Some(min),
            max_value: Some(max),
        }
    }

    /// Restrict to changes of `property`.
    #[must_use]
    pub fn on_property(mut self, property: &str) -> Self {
        self.property = Some(property.to_string());
        self
    }

    /// Evaluate against a change payload.
    #[must_use]
    pub fn evaluate(&self, payload: &EventPayload) -> bool {
        if let Some(property) = &self.property {
            if payload.property.as_deref() != Some(property.as_str()) {
                return false;
            }
        }
        payload
            .new_value
            .as_ref()
            .is_some_and(|actual| self.test(actual))
    }

    /// Evaluate against a bare value.
    #[must_use]
    pub fn test(&self, actual: &Value) -> bool {
        let numeric = |op: fn(f64, f64) -> bool| match (to_number(actual), to_number(&self.value)) {
            (Some(a), Some(b)) => op(a, b),
            _ => false,
        };
        match self.operator {
            ConditionOperator::Equals => loose_equals(actual, &self.value),
            ConditionOperator::NotEquals => !loose_equals(actual, &self.value),
            ConditionOperator::GreaterThan => numeric(|a, b| a > b),
            ConditionOperator::LessThan => numeric(|a, b| a < b),
            ConditionOperator::GreaterThanOrEqual => numeric(|a, b| a >= b),
            ConditionOperator::LessThanOrEqual => numeric(|a, b| a <= b),
            ConditionOperator::Contains => to_text(actual).contains(&to_text(&self.value)),
            ConditionOperator::StartsWith => to_text(actual).starts_with(&to_text(&self.value)),
            ConditionOperator::EndsWith => to_text(actual).ends_with(&to_text(&self.value)),
            ConditionOperator::Between => {
                let bound = |v: &Option<Value>| v.as_ref().and_then(to_number);
                match (to_number(actual), bound(&self.min_value), bound(&self.max_value)) {
                    (Some(x), Some(min), Some(max)) => min <= x && x <= max,
                    _ => false,
                }
            }
        }
    }
}

/// Equality that also matches a number against its text form.
fn loose_equals(a: &Value, b: &Value) -> bool {
    if values_equal(a, b) {
        return true;
    }
    match (a, b) {
        (Value::String(_), Value::Number(_)) | (Value::Number(_), Value::String(_)) => {
            matches!((to_number(a), to_number(b)), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}
