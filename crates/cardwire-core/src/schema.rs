//! Data requirement schema for widget types.
//!
//! A widget type declares the fields it consumes:
//!
//! - `DataFieldRequirement` - One field (value, object or array, nested recursively)
//! - `DataRelationship` - A field computed from other fields
//! - `UpdateConfig` - Which update triggers the widget supports
//! - `ComponentDataRequirement` - The complete declaration for one widget type
//!
//! # Example
//!
//! ```
//! use cardwire_core::schema::{ComponentDataRequirement, DataFieldRequirement, ValueType};
//!
//! let requirement = ComponentDataRequirement::new("Temperature card")
//!     .with_field(
//!         "temperature",
//!         DataFieldRequirement::value(ValueType::Number, "Current temperature").required(),
//!     );
//! assert!(requirement.validate("temperature-card").is_ok());
//! ```

use crate::error::{SchemaError, SchemaIssue};
use crate::value::FieldMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Scalar type of a `value` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// JSON number.
    Number,
    /// JSON string.
    String,
    /// JSON boolean.
    Boolean,
    /// Anything.
    #[default]
    Any,
}

impl ValueType {
    /// Check whether `value` has this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Any => true,
        }
    }
}

/// Nested field set of an object or array field.
pub type Structure = BTreeMap<String, DataFieldRequirement>;

/// Shape of a field.
///
/// `value` fields carry a scalar type; `object` and `array` fields may
/// carry a nested structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldShape {
    /// A scalar.
    Value {
        /// Expected scalar type.
        #[serde(default, rename = "valueType")]
        value_type: ValueType,
    },
    /// A JSON object.
    Object {
        /// Fields of the object.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        structure: Option<Structure>,
    },
    /// A JSON array.
    Array {
        /// Fields of each array element.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        structure: Option<Structure>,
    },
}

impl FieldShape {
    /// Short type name (`value`, `object`, `array`).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Value { .. } => "value",
            Self::Object { .. } => "object",
            Self::Array { .. } => "array",
        }
    }

    /// Nested structure, if any.
    #[must_use]
    pub const fn structure(&self) -> Option<&Structure> {
        match self {
            Self::Value { .. } => None,
            Self::Object { structure } | Self::Array { structure } => structure.as_ref(),
        }
    }
}

/// A user-supplied predicate used by validation rules.
#[derive(Clone)]
pub struct CustomCheck(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl CustomCheck {
    /// Wrap a predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Run the predicate. A panicking predicate counts as a failure.
    #[must_use]
    pub fn check(&self, value: &Value) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.0)(value))).unwrap_or(false)
    }
}

impl fmt::Debug for CustomCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomCheck(..)")
    }
}

/// Validation rules attached to a field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Minimum number, or minimum string length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Maximum number, or maximum string length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression a string must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Allowed values.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,
    /// Custom predicate.
    #[serde(skip)]
    pub custom: Option<CustomCheck>,
    /// Message reported instead of the rule's own message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationRules {
    /// Create an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a numeric (or length) range.
    #[must_use]
    pub const fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Set the minimum.
    #[must_use]
    pub const fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the maximum.
    #[must_use]
    pub const fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Set a pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Restrict to a set of values.
    #[must_use]
    pub fn with_one_of(mut self, values: Vec<Value>) -> Self {
        self.one_of = Some(values);
        self
    }

    /// Add a custom predicate.
    #[must_use]
    pub fn with_custom<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.custom = Some(CustomCheck::new(f));
        self
    }

    /// Override the failure message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// One field a widget consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFieldRequirement {
    /// Field name. Filled from the map key when left empty.
    #[serde(default)]
    pub name: String,
    /// Human-readable label.
    #[serde(default)]
    pub label: String,
    /// Field shape.
    #[serde(flatten)]
    pub shape: FieldShape,
    /// Whether the field must be present.
    #[serde(default)]
    pub required: bool,
    /// Value used when nothing else is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Example value, preferred for sample data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    /// What the field means. Must not be empty.
    #[serde(default)]
    pub description: String,
    /// Validation rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
}

impl DataFieldRequirement {
    fn with_shape(shape: FieldShape, description: &str) -> Self {
        Self {
            name: String::new(),
            label: String::new(),
            shape,
            required: false,
            default_value: None,
            example: None,
            description: description.to_string(),
            validation: None,
        }
    }

    /// Create a scalar field.
    #[must_use]
    pub fn value(value_type: ValueType, description: &str) -> Self {
        Self::with_shape(FieldShape::Value { value_type }, description)
    }

    /// Create an object field.
    #[must_use]
    pub fn object(description: &str) -> Self {
        Self::with_shape(FieldShape::Object { structure: None }, description)
    }

    /// Create an array field.
    #[must_use]
    pub fn array(description: &str) -> Self {
        Self::with_shape(FieldShape::Array { structure: None }, description)
    }

    /// Mark as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Set the example value.
    #[must_use]
    pub fn with_example(mut self, value: Value) -> Self {
        self.example = Some(value);
        self
    }

    /// Set validation rules.
    #[must_use]
    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.validation = Some(rules);
        self
    }

    /// Add a nested field. No effect on `value` fields.
    #[must_use]
    pub fn with_child(mut self, name: &str, mut child: Self) -> Self {
        if let FieldShape::Object { structure } | FieldShape::Array { structure } = &mut self.shape
        {
            if child.name.is_empty() {
                child.name = name.to_string();
            }
            structure
                .get_or_insert_with(BTreeMap::new)
                .insert(name.to_string(), child);
        }
        self
    }
}

/// How a relationship computes its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// The value of the first input, verbatim.
    Independent,
    /// Produced by a calculator over the declared inputs.
    Calculated,
    /// Currently the value of the first input, like `Independent`.
    Derived,
}

type CalculatorFn = dyn Fn(&FieldMap) -> Result<Value, String> + Send + Sync;

/// A pure function computing a relationship value from its inputs.
#[derive(Clone)]
pub struct Calculator(Arc<CalculatorFn>);

impl Calculator {
    /// Wrap a fallible function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&FieldMap) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wrap an infallible function.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&FieldMap) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(move |inputs| Ok(f(inputs))))
    }

    /// Invoke the calculator. Panics are reported as errors.
    pub fn call(&self, inputs: &FieldMap) -> Result<Value, String> {
        catch_unwind(AssertUnwindSafe(|| (self.0)(inputs)))
            .unwrap_or_else(|_| Err("calculator panicked".to_string()))
    }
}

impl fmt::Debug for Calculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Calculator(..)")
    }
}

/// A field whose value is computed from other fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRelationship {
    /// How the value is computed.
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    /// Names of the fields the relationship reads.
    pub inputs: Vec<String>,
    /// Calculator for `calculated` relationships.
    #[serde(skip)]
    pub calculator: Option<Calculator>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DataRelationship {
    /// Pass-through of a single input.
    #[must_use]
    pub fn independent(input: &str) -> Self {
        Self {
            kind: RelationshipKind::Independent,
            inputs: vec![input.to_string()],
            calculator: None,
            description: None,
        }
    }

    /// Derived from the given inputs.
    #[must_use]
    pub fn derived(inputs: &[&str]) -> Self {
        Self {
            kind: RelationshipKind::Derived,
            inputs: inputs.iter().map(ToString::to_string).collect(),
            calculator: None,
            description: None,
        }
    }

    /// Calculated from the given inputs.
    #[must_use]
    pub fn calculated(inputs: &[&str], calculator: Calculator) -> Self {
        Self {
            kind: RelationshipKind::Calculated,
            inputs: inputs.iter().map(ToString::to_string).collect(),
            calculator: Some(calculator),
            description: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Compute the relationship value from `inputs`.
    ///
    /// Calculators only see the declared inputs. A failing calculator yields
    /// `None` and a warning.
    #[must_use]
    pub fn compute(&self, name: &str, inputs: &FieldMap) -> Option<Value> {
        match self.kind {
            RelationshipKind::Independent | RelationshipKind::Derived => self
                .inputs
                .first()
                .and_then(|first| inputs.get(first))
                .cloned(),
            RelationshipKind::Calculated => {
                let calculator = self.calculator.as_ref()?;
                let declared: FieldMap = self
                    .inputs
                    .iter()
                    .filter_map(|input| inputs.get(input).map(|v| (input.clone(), v.clone())))
                    .collect();
                match calculator.call(&declared) {
                    Ok(value) => Some(value),
                    Err(message) => {
                        tracing::warn!(relationship = %name, %message, "calculator failed");
                        None
                    }
                }
            }
        }
    }
}

/// Kinds of update trigger a widget accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Explicit refresh requests.
    Manual,
    /// Fixed-interval polling.
    Timer,
    /// Provider-initiated pushes.
    Push,
}

/// Update scheduling hints for a widget type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    /// Trigger kinds the widget supports.
    pub supported_triggers: Vec<TriggerKind>,
    /// Suggested polling interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_interval: Option<u64>,
    /// Smallest polling interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval: Option<u64>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            supported_triggers: vec![TriggerKind::Manual],
            recommended_interval: Some(5000),
            min_interval: Some(1000),
        }
    }
}

/// Everything a widget type declares about its data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDataRequirement {
    /// Display name of the widget type.
    #[serde(default)]
    pub display_name: String,
    /// Description of the widget type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields by name.
    pub fields: BTreeMap<String, DataFieldRequirement>,
    /// Relationships by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, DataRelationship>,
    /// Update scheduling hints.
    #[serde(default)]
    pub update_config: UpdateConfig,
}

impl ComponentDataRequirement {
    /// Create an empty requirement.
    #[must_use]
    pub fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            ..Self::default()
        }
    }

    /// The built-in single-field requirement substituted for invalid ones.
    #[must_use]
    pub fn fallback(display_name: &str) -> Self {
        Self::new(display_name).with_field(
            "data",
            DataFieldRequirement::object("component default data field")
                .with_label("Data")
                .with_default(Value::Object(FieldMap::new()))
                .with_example(Value::Object(FieldMap::new())),
        )
    }

    /// Add a field.
    #[must_use]
    pub fn with_field(mut self, name: &str, mut field: DataFieldRequirement) -> Self {
        if field.name.is_empty() {
            field.name = name.to_string();
        }
        self.fields.insert(name.to_string(), field);
        self
    }

    /// Add a relationship.
    #[must_use]
    pub fn with_relationship(mut self, name: &str, relationship: DataRelationship) -> Self {
        self.relationships.insert(name.to_string(), relationship);
        self
    }

    /// Set update hints.
    #[must_use]
    pub fn with_update_config(mut self, config: UpdateConfig) -> Self {
        self.update_config = config;
        self
    }

    /// Fill empty field names from their map keys, recursively.
    pub fn normalize_names(&mut self) {
        fn fill(structure: &mut Structure) {
            for (key, field) in structure.iter_mut() {
                if field.name.is_empty() {
                    field.name.clone_from(key);
                }
                if let FieldShape::Object {
                    structure: Some(nested),
                }
                | FieldShape::Array {
                    structure: Some(nested),
                } = &mut field.shape
                {
                    fill(nested);
                }
            }
        }
        fill(&mut self.fields);
    }

    /// Collect every issue with this requirement.
    #[must_use]
    pub fn issues(&self) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();
        if self.fields.is_empty() {
            issues.push(SchemaIssue::NoFields);
        }
        check_structure(&self.fields, "", &mut issues);

        for (name, relationship) in &self.relationships {
            if relationship.inputs.is_empty() {
                issues.push(SchemaIssue::EmptyInputs {
                    relationship: name.clone(),
                });
            }
            for input in &relationship.inputs {
                if !self.fields.contains_key(input) {
                    issues.push(SchemaIssue::UnknownInput {
                        relationship: name.clone(),
                        input: input.clone(),
                    });
                }
            }
            if relationship.kind == RelationshipKind::Calculated
                && relationship.calculator.is_none()
            {
                issues.push(SchemaIssue::MissingCalculator {
                    relationship: name.clone(),
                });
            }
        }
        issues
    }

    /// Validate the requirement.
    pub fn validate(&self, widget_type: &str) -> Result<(), SchemaError> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(SchemaError {
                widget_type: widget_type.to_string(),
                issues,
            })
        }
    }

    /// Names of required fields.
    #[must_use]
    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Names of optional fields.
    #[must_use]
    pub fn optional_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| !f.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn check_structure(structure: &Structure, prefix: &str, issues: &mut Vec<SchemaIssue>) {
    for (name, field) in structure {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        if field.description.trim().is_empty() {
            issues.push(SchemaIssue::MissingDescription {
                field: path.clone(),
            });
        }
        if let Some(rules) = &field.validation {
            if let (Some(min), Some(max)) = (rules.min, rules.max) {
                if min > max {
                    issues.push(SchemaIssue::InvalidRange {
                        field: path.clone(),
                    });
                }
            }
            if let Some(pattern) = &rules.pattern {
                if let Err(e) = regex::Regex::new(pattern) {
                    issues.push(SchemaIssue::InvalidPattern {
                        field: path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if let Some(nested) = field.shape.structure() {
            if nested.is_empty() {
                issues.push(SchemaIssue::EmptyStructure {
                    field: path.clone(),
                });
            }
            check_structure(nested, &path, issues);
        }
    }
}
