//! Expression executor.
//!
//! Evaluates a parsed [`Expression`] against a [`ScriptScope`]. Execution is
//! bounded by [`ExecutionLimits`]: every transform and every row it touches
//! costs one step, and the deadline is checked as steps are spent.

use crate::error::ExecutionError;
use crate::expression::{CompareOp, Expression, Source, Transform};
use crate::scope::ScriptScope;
use cardwire_core::path::resolve;
use cardwire_core::value::{number, to_number, to_text, values_equal};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Bounds on a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Maximum number of steps.
    pub max_steps: usize,
    /// Wall-clock deadline.
    pub deadline: Option<Instant>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            deadline: None,
        }
    }
}

impl ExecutionLimits {
    /// Limits with a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::default()
        }
    }

    /// Override the step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

struct Budget {
    limits: ExecutionLimits,
    spent: usize,
}

impl Budget {
    const fn new(limits: ExecutionLimits) -> Self {
        Self { limits, spent: 0 }
    }

    fn spend(&mut self, steps: usize) -> Result<(), ExecutionError> {
        let before = self.spent;
        self.spent = self.spent.saturating_add(steps);
        if self.spent > self.limits.max_steps {
            return Err(ExecutionError::StepLimit(self.limits.max_steps));
        }
        // checking the clock on every step is measurably slow on big arrays
        if before / 256 != self.spent / 256 || steps == 1 {
            if let Some(deadline) = self.limits.deadline {
                if Instant::now() >= deadline {
                    return Err(ExecutionError::Timeout);
                }
            }
        }
        Ok(())
    }
}

/// Expression executor.
#[derive(Debug, Default)]
pub struct ExpressionExecutor {
    limits: ExecutionLimits,
}

impl ExpressionExecutor {
    /// Create an executor with the given limits.
    #[must_use]
    pub const fn new(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    /// Execute an expression.
    pub fn execute(&self, expr: &Expression, scope: &ScriptScope) -> Result<Value, ExecutionError> {
        let mut budget = Budget::new(self.limits);
        budget.spend(1)?;

        let mut value = match &expr.source {
            Source::Literal(value) => value.clone(),
            Source::Path(path) => scope
                .get_path(path)
                .cloned()
                .ok_or_else(|| ExecutionError::SourceNotFound(path.clone()))?,
        };

        for transform in &expr.transforms {
            budget.spend(1)?;
            value = apply_transform(value, transform, scope, &mut budget)?;
        }
        Ok(value)
    }
}

fn apply_transform(
    value: Value,
    transform: &Transform,
    scope: &ScriptScope,
    budget: &mut Budget,
) -> Result<Value, ExecutionError> {
    match transform {
        Transform::Filter { field, value: expected } => {
            let rows = expect_array(value, "filter")?;
            budget.spend(rows.len())?;
            Ok(Value::Array(
                rows.into_iter()
                    .filter(|row| field_of(row, field).is_some_and(|v| to_text(v) == *expected))
                    .collect(),
            ))
        }
        Transform::Where { field, op, value: rhs } => {
            let rows = expect_array(value, "where")?;
            budget.spend(rows.len())?;
            Ok(Value::Array(
                rows.into_iter()
                    .filter(|row| field_of(row, field).is_some_and(|v| compare_values(v, *op, rhs)))
                    .collect(),
            ))
        }
        Transform::Select { fields } => match value {
            Value::Array(rows) => {
                budget.spend(rows.len())?;
                Ok(Value::Array(
                    rows.iter().map(|row| select_fields(row, fields)).collect(),
                ))
            }
            Value::Object(_) => Ok(select_fields(&value, fields)),
            _ => Err(ExecutionError::ExpectedArray("select".into())),
        },
        Transform::Sort { field, desc } => {
            let mut rows = expect_array(value, "sort")?;
            budget.spend(rows.len())?;
            rows.sort_by(|a, b| {
                let (a, b) = if field.is_empty() {
                    (Some(a), Some(b))
                } else {
                    (field_of(a, field), field_of(b, field))
                };
                let missing = |v: Option<&Value>| v.map_or(true, Value::is_null);
                let ord = compare_optional(a, b);
                // missing values stay last in both directions
                if *desc && !missing(a) && !missing(b) {
                    ord.reverse()
                } else {
                    ord
                }
            });
            Ok(Value::Array(rows))
        }
        Transform::Limit { n } => {
            let rows = expect_array(value, "limit")?;
            Ok(Value::Array(rows.into_iter().take(*n).collect()))
        }
        Transform::Offset { n } => {
            let rows = expect_array(value, "offset")?;
            Ok(Value::Array(rows.into_iter().skip(*n).collect()))
        }
        Transform::First => Ok(expect_array(value, "first")?
            .into_iter()
            .next()
            .unwrap_or(Value::Null)),
        Transform::Last => Ok(expect_array(value, "last")?.pop().unwrap_or(Value::Null)),
        Transform::Count => match value {
            Value::Array(rows) => Ok(Value::from(rows.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Null => Ok(Value::from(0)),
            _ => Err(ExecutionError::ExpectedArray("count".into())),
        },
        Transform::Sum { field } => {
            let nums = numbers(value, field.as_deref(), "sum", budget)?;
            Ok(number(nums.iter().sum()))
        }
        Transform::Mean { field } => {
            let nums = numbers(value, field.as_deref(), "mean", budget)?;
            if nums.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(number(nums.iter().sum::<f64>() / nums.len() as f64))
            }
        }
        Transform::Min { field } => {
            let nums = numbers(value, field.as_deref(), "min", budget)?;
            Ok(nums.into_iter().reduce(f64::min).map_or(Value::Null, number))
        }
        Transform::Max { field } => {
            let nums = numbers(value, field.as_deref(), "max", budget)?;
            Ok(nums.into_iter().reduce(f64::max).map_or(Value::Null, number))
        }
        Transform::Pluck { field } => {
            let rows = expect_array(value, "pluck")?;
            budget.spend(rows.len())?;
            Ok(Value::Array(
                rows.iter()
                    .map(|row| field_of(row, field).cloned().unwrap_or(Value::Null))
                    .collect(),
            ))
        }
        Transform::Get { path } => Ok(resolve(&value, path).cloned().unwrap_or(Value::Null)),
        Transform::GroupBy { field } => group_by(value, field, budget),
        Transform::Distinct { field } => {
            let rows = expect_array(value, "distinct")?;
            budget.spend(rows.len())?;
            let mut seen: Vec<Value> = Vec::new();
            let mut out = Vec::new();
            for row in rows {
                let key = match field {
                    Some(f) => field_of(&row, f).cloned().unwrap_or(Value::Null),
                    None => row.clone(),
                };
                if !seen.iter().any(|s| values_equal(s, &key)) {
                    seen.push(key);
                    out.push(row);
                }
            }
            Ok(Value::Array(out))
        }
        Transform::Flatten => {
            let rows = expect_array(value, "flatten")?;
            budget.spend(rows.len())?;
            let mut out = Vec::new();
            for row in rows {
                match row {
                    Value::Array(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        Transform::FlattenKeys => {
            let map = expect_object(value, "flatten_keys")?;
            let mut out = Map::new();
            flatten_into(&mut out, "", Value::Object(map), budget)?;
            Ok(Value::Object(out))
        }
        Transform::Reverse => match value {
            Value::Array(mut rows) => {
                rows.reverse();
                Ok(Value::Array(rows))
            }
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            _ => Err(ExecutionError::ExpectedArray("reverse".into())),
        },
        Transform::Pivot { row, col, value: cell } => {
            let rows = expect_array(value, "pivot")?;
            budget.spend(rows.len())?;
            let mut out = Map::new();
            for item in &rows {
                let (Some(r), Some(c)) = (field_of(item, row), field_of(item, col)) else {
                    continue;
                };
                let entry = out
                    .entry(to_text(r))
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(columns) = entry {
                    columns.insert(
                        to_text(c),
                        field_of(item, cell).cloned().unwrap_or(Value::Null),
                    );
                }
            }
            Ok(Value::Object(out))
        }
        Transform::Join { other, on } => {
            let left = expect_array(value, "join")?;
            let right = match scope.get_path(other) {
                Some(Value::Array(rows)) => rows,
                Some(_) => return Err(ExecutionError::ExpectedArray("join".into())),
                None => return Err(ExecutionError::SourceNotFound(other.clone())),
            };
            budget.spend(left.len().saturating_mul(right.len().max(1)))?;
            let mut out = Vec::new();
            for row in left {
                let Some(key) = field_of(&row, on) else {
                    continue;
                };
                if let Some(Value::Object(matched)) = right
                    .iter()
                    .find(|r| field_of(r, on).is_some_and(|k| values_equal(k, key)))
                {
                    let mut merged = match row {
                        Value::Object(map) => map,
                        _ => continue,
                    };
                    for (k, v) in matched {
                        merged.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    out.push(Value::Object(merged));
                }
            }
            Ok(Value::Array(out))
        }
        Transform::Round { digits } => {
            let factor = 10f64.powi(*digits as i32);
            map_numbers(value, "round", budget, |n| (n * factor).round() / factor)
        }
        Transform::Scale { factor } => map_numbers(value, "scale", budget, |n| n * factor),
        Transform::Add { n: addend } => map_numbers(value, "add", budget, |n| n + addend),
        Transform::Percentage => map_numbers(value, "percentage", budget, |n| n * 100.0),
        Transform::Fixed { digits } => {
            let n = to_number(&value)
                .ok_or_else(|| ExecutionError::TypeMismatch("fixed expects a number".into()))?;
            Ok(Value::String(format!("{n:.prec$}", prec = *digits as usize)))
        }
        Transform::Default { value: fallback } => Ok(if value.is_null() {
            fallback.clone()
        } else {
            value
        }),
        Transform::ToText => Ok(Value::String(to_text(&value))),
        Transform::ToNumber => Ok(to_number(&value).map_or(Value::Null, number)),
        Transform::Upper => Ok(Value::String(text_of(&value, "upper")?.to_uppercase())),
        Transform::Lower => Ok(Value::String(text_of(&value, "lower")?.to_lowercase())),
        Transform::Prefix { text } => Ok(Value::String(format!("{text}{}", to_text(&value)))),
        Transform::Suffix { text } => Ok(Value::String(format!("{}{text}", to_text(&value)))),
        Transform::Keys => Ok(Value::Array(
            expect_object(value, "keys")?
                .into_iter()
                .map(|(k, _)| Value::String(k))
                .collect(),
        )),
        Transform::Values => Ok(Value::Array(
            expect_object(value, "values")?
                .into_iter()
                .map(|(_, v)| v)
                .collect(),
        )),
    }
}

fn expect_array(value: Value, name: &str) -> Result<Vec<Value>, ExecutionError> {
    match value {
        Value::Array(rows) => Ok(rows),
        _ => Err(ExecutionError::ExpectedArray(name.to_string())),
    }
}

fn expect_object(value: Value, name: &str) -> Result<Map<String, Value>, ExecutionError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ExecutionError::ExpectedObject(name.to_string())),
    }
}

fn field_of<'a>(row: &'a Value, field: &str) -> Option<&'a Value> {
    resolve(row, field)
}

fn text_of(value: &Value, name: &str) -> Result<String, ExecutionError> {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Null => Err(ExecutionError::TypeMismatch(
            format!("{name} expects text"),
        )),
        other => Ok(to_text(other)),
    }
}

fn select_fields(row: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(v) = field_of(row, field) {
            out.insert(field.clone(), v.clone());
        }
    }
    Value::Object(out)
}

fn numbers(
    value: Value,
    field: Option<&str>,
    name: &str,
    budget: &mut Budget,
) -> Result<Vec<f64>, ExecutionError> {
    let rows = expect_array(value, name)?;
    budget.spend(rows.len())?;
    Ok(rows
        .iter()
        .filter_map(|row| match field {
            Some(f) => field_of(row, f),
            None => Some(row),
        })
        .filter(|v| !v.is_null())
        .filter_map(to_number)
        .collect())
}

fn map_numbers<F>(value: Value, name: &str, budget: &mut Budget, f: F) -> Result<Value, ExecutionError>
where
    F: Fn(f64) -> f64,
{
    match value {
        Value::Array(rows) => {
            budget.spend(rows.len())?;
            Ok(Value::Array(
                rows.iter()
                    .map(|v| to_number(v).map_or(Value::Null, |n| number(f(n))))
                    .collect(),
            ))
        }
        Value::Null => Ok(Value::Null),
        other => to_number(&other)
            .map(|n| number(f(n)))
            .ok_or_else(|| ExecutionError::TypeMismatch(format!("{name} expects a number"))),
    }
}

fn group_by(value: Value, field: &str, budget: &mut Budget) -> Result<Value, ExecutionError> {
    let rows = expect_array(value, "group_by")?;
    budget.spend(rows.len())?;
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for row in rows {
        let key = field_of(&row, field).cloned().unwrap_or(Value::Null);
        match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
            Some((_, items)) => items.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    Ok(Value::Array(
        groups
            .into_iter()
            .map(|(key, items)| {
                let mut group = Map::new();
                group.insert("key".into(), key);
                group.insert("count".into(), Value::from(items.len()));
                group.insert("items".into(), Value::Array(items));
                Value::Object(group)
            })
            .collect(),
    ))
}

fn flatten_into(
    out: &mut Map<String, Value>,
    prefix: &str,
    value: Value,
    budget: &mut Budget,
) -> Result<(), ExecutionError> {
    budget.spend(1)?;
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten_into(out, &join(&k), v, budget)?;
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.into_iter().enumerate() {
                flatten_into(out, &join(&i.to_string()), v, budget)?;
            }
        }
        other => {
            out.insert(prefix.to_string(), other);
        }
    }
    Ok(())
}

fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_json(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (to_number(a).unwrap_or(0.0), to_number(b).unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        // nulls sort last
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => to_text(a).cmp(&to_text(b)),
    }
}

fn compare_values(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    let numeric = || to_number(lhs).zip(to_number(rhs));
    match op {
        CompareOp::Eq => values_equal(lhs, rhs) || loose_text_eq(lhs, rhs),
        CompareOp::Ne => !(values_equal(lhs, rhs) || loose_text_eq(lhs, rhs)),
        CompareOp::Gt => numeric().is_some_and(|(a, b)| a > b),
        CompareOp::Lt => numeric().is_some_and(|(a, b)| a < b),
        CompareOp::Gte => numeric().is_some_and(|(a, b)| a >= b),
        CompareOp::Lte => numeric().is_some_and(|(a, b)| a <= b),
        CompareOp::Contains => match lhs {
            Value::Array(items) => items.iter().any(|i| values_equal(i, rhs)),
            other => to_text(other).contains(&to_text(rhs)),
        },
        CompareOp::StartsWith => to_text(lhs).starts_with(&to_text(rhs)),
        CompareOp::EndsWith => to_text(lhs).ends_with(&to_text(rhs)),
    }
}

// `where(status == active)` compares the unquoted word as text
fn loose_text_eq(lhs: &Value, rhs: &Value) -> bool {
    matches!(rhs, Value::String(_)) && !lhs.is_object() && !lhs.is_array() && to_text(lhs) == to_text(rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionParser;
    use serde_json::json;

    fn run(input: &str, scope: &ScriptScope) -> Result<Value, ExecutionError> {
        let expr = ExpressionParser::new().parse(input).expect("parse");
        ExpressionExecutor::default().execute(&expr, scope)
    }

    fn readings() -> ScriptScope {
        ScriptScope::new().with(
            "readings",
            json!([
                {"room": "lab", "temp": 21.5, "status": "ok"},
                {"room": "office", "temp": 24.0, "status": "warn"},
                {"room": "lab", "temp": 19.0, "status": "ok"},
                {"room": "hall", "temp": null, "status": "offline"}
            ]),
        )
    }

    // =========================================================================
    // Sources
    // =========================================================================

    #[test]
    fn test_literal_source() {
        let scope = ScriptScope::new();
        assert_eq!(run("[1, 2, 3] | sum", &scope), Ok(json!(6)));
        assert_eq!(run(r#""abc" | upper"#, &scope), Ok(json!("ABC")));
    }

    #[test]
    fn test_missing_source() {
        assert_eq!(
            run("readings[9].temp", &readings()),
            Err(ExecutionError::SourceNotFound("readings[9].temp".into()))
        );
    }

    // =========================================================================
    // Row transforms
    // =========================================================================

    #[test]
    fn test_filter_and_count() {
        assert_eq!(run("readings | filter(status=ok) | count", &readings()), Ok(json!(2)));
    }

    #[test]
    fn test_where_numeric_and_text() {
        assert_eq!(
            run("readings | where(temp > 20) | pluck(room)", &readings()),
            Ok(json!(["lab", "office"]))
        );
        assert_eq!(
            run("readings | where(status != ok) | count", &readings()),
            Ok(json!(2))
        );
        assert_eq!(
            run("readings | where(room starts_with \"of\") | count", &readings()),
            Ok(json!(1))
        );
    }

    #[test]
    fn test_sort_limit_offset() {
        assert_eq!(
            run("readings | sort(temp, desc=true) | limit(2) | pluck(temp)", &readings()),
            Ok(json!([24.0, 21.5]))
        );
        assert_eq!(
            run("readings | sort(temp) | pluck(temp)", &readings()),
            Ok(json!([19.0, 21.5, 24.0, null]))
        );
        assert_eq!(
            run("readings | offset(3) | first | get(room)", &readings()),
            Ok(json!("hall"))
        );
    }

    #[test]
    fn test_aggregates_skip_nulls() {
        let scope = readings();
        assert_eq!(run("readings | sum(temp)", &scope), Ok(json!(64.5)));
        assert_eq!(run("readings | mean(temp)", &scope), Ok(json!(21.5)));
        assert_eq!(run("readings | min(temp)", &scope), Ok(json!(19)));
        assert_eq!(run("readings | max(temp)", &scope), Ok(json!(24)));
        assert_eq!(run("[] | mean", &scope), Ok(Value::Null));
        assert_eq!(run("[] | sum", &scope), Ok(json!(0)));
    }

    #[test]
    fn test_group_by() {
        let grouped = run("readings | group_by(room)", &readings()).expect("runs");
        assert_eq!(grouped[0]["key"], "lab");
        assert_eq!(grouped[0]["count"], 2);
        assert_eq!(grouped.as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_distinct_flatten_reverse() {
        let scope = ScriptScope::new();
        assert_eq!(run("[[1, 2], [2, 3], 4] | flatten | distinct", &scope), Ok(json!([1, 2, 3, 4])));
        assert_eq!(run("[1, 2, 3] | reverse", &scope), Ok(json!([3, 2, 1])));
        assert_eq!(
            run("readings | distinct(room) | count", &readings()),
            Ok(json!(3))
        );
    }

    #[test]
    fn test_pivot() {
        let scope = ScriptScope::new().with(
            "rows",
            json!([
                {"day": "mon", "metric": "temp", "v": 20},
                {"day": "mon", "metric": "hum", "v": 40},
                {"day": "tue", "metric": "temp", "v": 22}
            ]),
        );
        assert_eq!(
            run("rows | pivot(day, metric, v)", &scope),
            Ok(json!({"mon": {"temp": 20, "hum": 40}, "tue": {"temp": 22}}))
        );
    }

    #[test]
    fn test_join() {
        let scope = ScriptScope::new()
            .with("orders", json!([{"id": 1, "cid": 7}, {"id": 2, "cid": 8}]))
            .with("customers", json!([{"cid": 7, "name": "Ada"}]));
        assert_eq!(
            run("orders | join(customers, on=cid)", &scope),
            Ok(json!([{"id": 1, "cid": 7, "name": "Ada"}]))
        );
    }

    #[test]
    fn test_flatten_keys() {
        let scope = ScriptScope::new().with("m", json!({"a": {"b": 1, "c": [5, 6]}, "d": {}}));
        assert_eq!(
            run("m | flatten_keys", &scope),
            Ok(json!({"a.b": 1, "a.c.0": 5, "a.c.1": 6, "d": {}}))
        );
    }

    // =========================================================================
    // Scalar transforms
    // =========================================================================

    #[test]
    fn test_numeric_scalars() {
        let scope = ScriptScope::new().with("value", json!(21.456));
        assert_eq!(run("value | round(1)", &scope), Ok(json!(21.5)));
        assert_eq!(run("value | round", &scope), Ok(json!(21)));
        assert_eq!(run("value | fixed(2)", &scope), Ok(json!("21.46")));
        assert_eq!(run("0.25 | percentage", &scope), Ok(json!(25)));
        assert_eq!(run("\"300\" | add(-273.15) | round(2)", &scope), Ok(json!(26.85)));
        assert_eq!(run("[1, 2] | scale(10)", &scope), Ok(json!([10, 20])));
        assert!(matches!(
            run("{\"a\": 1} | scale(2)", &scope),
            Err(ExecutionError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_text_scalars() {
        let scope = ScriptScope::new().with("value", json!(23));
        assert_eq!(run(r#"value | suffix(" °C")"#, &scope), Ok(json!("23 °C")));
        assert_eq!(run("value | to_text", &scope), Ok(json!("23")));
        assert_eq!(run("\"4.5\" | to_number", &scope), Ok(json!(4.5)));
        assert_eq!(run("null | default(\"n/a\")", &scope), Ok(json!("n/a")));
        assert_eq!(run("{\"b\": 1, \"a\": 2} | keys", &scope), Ok(json!(["a", "b"])));
    }

    #[test]
    fn test_type_errors() {
        let scope = ScriptScope::new();
        assert_eq!(
            run("42 | limit(1)", &scope),
            Err(ExecutionError::ExpectedArray("limit".into()))
        );
        assert_eq!(
            run("[1] | keys", &scope),
            Err(ExecutionError::ExpectedObject("keys".into()))
        );
    }

    // =========================================================================
    // Limits
    // =========================================================================

    #[test]
    fn test_step_limit() {
        let scope = ScriptScope::new().with("big", Value::Array(vec![json!(1); 500]));
        let expr = ExpressionParser::new().parse("big | sum").expect("parse");
        let executor = ExpressionExecutor::new(ExecutionLimits::default().with_max_steps(100));
        assert_eq!(executor.execute(&expr, &scope), Err(ExecutionError::StepLimit(100)));
    }

    #[test]
    fn test_deadline() {
        let expr = ExpressionParser::new().parse("1 | add(1)").expect("parse");
        let limits = ExecutionLimits {
            max_steps: 10,
            deadline: Some(Instant::now()),
        };
        assert_eq!(
            ExpressionExecutor::new(limits).execute(&expr, &ScriptScope::new()),
            Err(ExecutionError::Timeout)
        );
    }
}
