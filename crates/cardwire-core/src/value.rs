//! Loose JSON value semantics shared by conditions, coercion and scripts.
//!
//! Dashboard payloads arrive from scripts and HTTP bodies where numbers are
//! often strings and booleans are often numbers; these helpers define one
//! consistent reading of such values.

use serde_json::{Map, Number, Value};

/// A field map delivered to a widget (`field name -> value`).
pub type FieldMap = Map<String, Value>;

/// Largest integer that survives an f64 round trip.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric reading of a value.
///
/// Strings are trimmed and parsed (the empty string reads as `0`), booleans
/// read as `0`/`1`. Everything else has no numeric reading.
#[must_use]
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|f| !f.is_nan())
            }
        }
        _ => None,
    }
}

/// Text reading of a value.
///
/// Strings are returned verbatim, integral floats print without a fraction,
/// arrays join their elements with `,` and objects print as `[object Object]`.
#[must_use]
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_text(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn format_number(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

/// Build a JSON number, preferring an integer representation.
///
/// Non-finite values become `null`.
#[must_use]
pub fn number(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

/// Strict equality, except that numbers compare by numeric value.
///
/// `23` and `23.0` are equal; `"23"` and `23` are not.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}
