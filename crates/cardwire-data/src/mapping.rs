//! Mapping rules.
//!
//! A [`MappingRule`] moves one value out of a raw provider payload into a
//! named widget field:
//!
//! 1. resolve `source_path` against the payload
//! 2. apply the optional [`ValueTransform`]
//! 3. use `default_value` when the path does not resolve or the transform
//!    fails
//!
//! Only a missing value falls back; `0`, `false` and `""` are kept.

use cardwire_core::path::resolve;
use cardwire_core::FieldMap;
use cardwire_expr::{ExecutionLimits, ExpressionError, Script, ScriptScope};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type TransformFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// A pure function applied to an extracted value.
///
/// Either a native closure or an expression such as `value | round(1)`,
/// evaluated with the extracted value bound to `value`.
#[derive(Clone)]
pub struct ValueTransform {
    f: Arc<TransformFn>,
    source: Option<String>,
}

impl fmt::Debug for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "ValueTransform({source:?})"),
            None => f.write_str("ValueTransform(<native>)"),
        }
    }
}

impl PartialEq for ValueTransform {
    fn eq(&self, other: &Self) -> bool {
        match (&self.source, &other.source) {
            (Some(a), Some(b)) => a == b,
            _ => Arc::ptr_eq(&self.f, &other.f),
        }
    }
}

impl ValueTransform {
    /// Native transform that may fail.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            source: None,
        }
    }

    /// Native transform that cannot fail.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self::new(move |v| Ok(f(v)))
    }

    /// Compile an expression over `value`.
    pub fn expression(source: &str) -> Result<Self, ExpressionError> {
        let script = Script::compile(source)?;
        if let Some(other) = script.references().into_iter().find(|r| r != "value") {
            return Err(ExpressionError::Syntax(format!(
                "mapping transforms can only read 'value', found '{other}'"
            )));
        }
        let text = source.to_string();
        Ok(Self {
            f: Arc::new(move |v: &Value| {
                script
                    .run(
                        &ScriptScope::new().with("value", v.clone()),
                        ExecutionLimits::default(),
                    )
                    .map_err(|e| e.to_string())
            }),
            source: Some(text),
        })
    }

    /// Expression text, if this is an expression transform.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Apply the transform. A panicking native transform is reported as an
    /// error.
    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        catch_unwind(AssertUnwindSafe(|| (self.f)(value)))
            .unwrap_or_else(|_| Err("transform panicked".to_string()))
    }
}

impl Serialize for ValueTransform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.source {
            Some(source) => serializer.serialize_str(source),
            None => Err(serde::ser::Error::custom(
                "native transforms cannot be serialized",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for ValueTransform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::expression(&source).map_err(serde::de::Error::custom)
    }
}

/// Moves one payload value into one widget field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    /// Path into the raw payload. Empty selects the whole payload.
    #[serde(default)]
    pub source_path: String,
    /// Widget field to fill.
    pub target_field: String,
    /// Optional transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<ValueTransform>,
    /// Value used when nothing resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl MappingRule {
    /// Map `source_path` to `target_field`.
    #[must_use]
    pub fn new(source_path: &str, target_field: &str) -> Self {
        Self {
            source_path: source_path.to_string(),
            target_field: target_field.to_string(),
            transform: None,
            default_value: None,
        }
    }

    /// Apply a transform.
    #[must_use]
    pub fn with_transform(mut self, transform: ValueTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Set the fallback value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Value this rule produces for `raw`. `None` means the field is left
    /// out.
    #[must_use]
    pub fn apply(&self, raw: &Value) -> Option<Value> {
        let Some(value) = resolve(raw, &self.source_path) else {
            return self.default_value.clone();
        };
        let Some(transform) = &self.transform else {
            return Some(value.clone());
        };
        match transform.apply(value) {
            Ok(out) => Some(out),
            Err(error) => {
                tracing::warn!(
                    target_field = %self.target_field,
                    source_path = %self.source_path,
                    %error,
                    "mapping transform failed, using default"
                );
                self.default_value.clone()
            }
        }
    }
}

/// Apply every rule to `raw`. Later rules win on duplicate targets.
#[must_use]
pub fn apply_rules(rules: &[MappingRule], raw: &Value) -> FieldMap {
    let mut fields = FieldMap::new();
    for rule in rules {
        if let Some(value) = rule.apply(raw) {
            fields.insert(rule.target_field.clone(), value);
        }
    }
    fields
}
