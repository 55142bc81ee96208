//! Validation of widget data against its requirement.
//!
//! This module provides:
//! - Built-in validators (required, bounds, pattern, one-of, custom)
//! - Recursive field checks for object and array structures
//! - A `ValidationReport` with errors, warnings and per-field details

use crate::schema::{ComponentDataRequirement, DataFieldRequirement, FieldShape, ValidationRules};
use crate::value::FieldMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Validation result for a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation passed.
    Valid,
    /// Validation failed with an error message.
    Invalid(String),
}

impl ValidationResult {
    /// Check if validation passed.
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Check if validation failed.
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    /// Get the error message if invalid.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Invalid(msg) => Some(msg),
            Self::Valid => None,
        }
    }
}

/// A validator over a JSON value.
pub trait Validator: Send + Sync {
    /// Validate the given value.
    fn validate(&self, value: &Value) -> ValidationResult;

    /// Get the name of this validator.
    fn name(&self) -> &str;
}

/// Required value validator: rejects `null`.
#[derive(Debug, Clone)]
pub struct Required {
    message: String,
}

impl Required {
    /// Create a required validator with default message.
    pub fn new() -> Self {
        Self {
            message: "This field is required".to_string(),
        }
    }
}

impl Default for Required {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for Required {
    fn validate(&self, value: &Value) -> ValidationResult {
        if value.is_null() {
            ValidationResult::Invalid(self.message.clone())
        } else {
            ValidationResult::Valid
        }
    }

    fn name(&self) -> &'static str {
        "required"
    }
}

/// Bounds validator: numeric value, or string length.
#[derive(Debug, Clone)]
pub struct Bounds {
    min: Option<f64>,
    max: Option<f64>,
}

impl Bounds {
    /// Create a bounds validator.
    pub const fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    fn measure(value: &Value) -> Option<(f64, &'static str)> {
        match value {
            Value::Number(n) => n.as_f64().map(|f| (f, "value")),
            Value::String(s) => Some((s.chars().count() as f64, "length")),
            _ => None,
        }
    }
}

impl Validator for Bounds {
    fn validate(&self, value: &Value) -> ValidationResult {
        let Some((measured, what)) = Self::measure(value) else {
            return ValidationResult::Valid;
        };
        if let Some(min) = self.min {
            if measured < min {
                return ValidationResult::Invalid(format!("{what} must be at least {min}"));
            }
        }
        if let Some(max) = self.max {
            if measured > max {
                return ValidationResult::Invalid(format!("{what} must be at most {max}"));
            }
        }
        ValidationResult::Valid
    }

    fn name(&self) -> &'static str {
        "bounds"
    }
}

/// Pattern validator for strings.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern validator. `None` when the pattern is invalid.
    pub fn new(pattern: &str) -> Option<Self> {
        Regex::new(pattern).ok().map(|regex| Self { regex })
    }
}

impl Validator for Pattern {
    fn validate(&self, value: &Value) -> ValidationResult {
        match value {
            Value::String(s) if !self.regex.is_match(s) => {
                ValidationResult::Invalid(format!("does not match pattern {}", self.regex))
            }
            _ => ValidationResult::Valid,
        }
    }

    fn name(&self) -> &'static str {
        "pattern"
    }
}

/// Enumerated-values validator.
#[derive(Debug, Clone)]
pub struct OneOf {
    allowed: Vec<Value>,
}

impl OneOf {
    /// Create a one-of validator.
    pub const fn new(allowed: Vec<Value>) -> Self {
        Self { allowed }
    }
}

impl Validator for OneOf {
    fn validate(&self, value: &Value) -> ValidationResult {
        if self.allowed.iter().any(|a| crate::value::values_equal(a, value)) {
            ValidationResult::Valid
        } else {
            let allowed: Vec<String> = self.allowed.iter().map(ToString::to_string).collect();
            ValidationResult::Invalid(format!("must be one of: {}", allowed.join(", ")))
        }
    }

    fn name(&self) -> &'static str {
        "enum"
    }
}

/// Custom predicate validator.
pub struct Custom<F>
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    validator: F,
    message: String,
}

impl<F> Custom<F>
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    /// Create a custom validator.
    pub fn new(validator: F, message: &str) -> Self {
        Self {
            validator,
            message: message.to_string(),
        }
    }
}

impl<F> Validator for Custom<F>
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn validate(&self, value: &Value) -> ValidationResult {
        if (self.validator)(value) {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(self.message.clone())
        }
    }

    fn name(&self) -> &'static str {
        "custom"
    }
}

impl ValidationRules {
    /// Build the validators described by these rules.
    #[must_use]
    pub fn validators(&self) -> Vec<Box<dyn Validator>> {
        let mut validators: Vec<Box<dyn Validator>> = Vec::new();
        if self.min.is_some() || self.max.is_some() {
            validators.push(Box::new(Bounds::new(self.min, self.max)));
        }
        if let Some(pattern) = self.pattern.as_deref().and_then(Pattern::new) {
            validators.push(Box::new(pattern));
        }
        if let Some(allowed) = &self.one_of {
            validators.push(Box::new(OneOf::new(allowed.clone())));
        }
        if let Some(check) = self.custom.clone() {
            validators.push(Box::new(Custom::new(
                move |v: &Value| check.check(v),
                "custom validation failed",
            )));
        }
        validators
    }
}

/// Outcome for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldReport {
    /// Whether the field passed.
    pub valid: bool,
    /// Failure message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of validating a field map against a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationReport {
    /// No errors were found. Warnings do not affect validity.
    pub valid: bool,
    /// Problems with required fields.
    pub errors: Vec<String>,
    /// Problems with optional fields and relationships.
    pub warnings: Vec<String>,
    /// Outcome per top-level field.
    pub details: BTreeMap<String, FieldReport>,
}

impl ValidationReport {
    fn record(&mut self, field: &str, required: bool, problems: Vec<String>) {
        let valid = problems.is_empty();
        let message = (!valid).then(|| problems.join("; "));
        for problem in problems {
            if required {
                self.errors.push(problem);
            } else {
                self.warnings.push(problem);
            }
        }
        self.details
            .insert(field.to_string(), FieldReport { valid, message });
    }
}

/// Validates field maps against requirements.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataValidator;

impl DataValidator {
    /// Validate `data` against `requirement`.
    ///
    /// Failures on required fields are errors; failures on optional fields
    /// are warnings. Relationship inputs missing from `data` are warnings.
    #[must_use]
    pub fn validate(requirement: &ComponentDataRequirement, data: &FieldMap) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (name, field) in &requirement.fields {
            let mut problems = Vec::new();
            check_field(name, field, data.get(name), &mut problems, &mut report.warnings);
            report.record(name, field.required, problems);
        }

        for (name, relationship) in &requirement.relationships {
            for input in &relationship.inputs {
                if !data.contains_key(input) {
                    report.warnings.push(format!(
                        "relationship '{name}' input '{input}' is missing"
                    ));
                }
            }
        }

        report.valid = report.errors.is_empty();
        report
    }
}

fn check_field(
    path: &str,
    field: &DataFieldRequirement,
    value: Option<&Value>,
    problems: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let value = match value {
        None | Some(Value::Null) => {
            if field.required {
                problems.push(format!("{path}: {}", "This field is required"));
            }
            return;
        }
        Some(v) => v,
    };

    match &field.shape {
        FieldShape::Value { value_type } => {
            if !value_type.matches(value) {
                problems.push(format!(
                    "{path}: expected {value_type:?}, got {}",
                    crate::path::detect_data_type(value)
                ));
                return;
            }
        }
        FieldShape::Object { structure } => {
            let Value::Object(map) = value else {
                problems.push(format!("{path}: expected object"));
                return;
            };
            if let Some(structure) = structure {
                for (key, child) in structure {
                    check_field(
                        &format!("{path}.{key}"),
                        child,
                        map.get(key),
                        problems,
                        warnings,
                    );
                }
            }
        }
        FieldShape::Array { structure } => {
            let Value::Array(items) = value else {
                problems.push(format!("{path}: expected array"));
                return;
            };
            // only the first element is sampled, and only as a warning
            if let (Some(structure), Some(Value::Object(first))) = (structure, items.first()) {
                let mut element_problems = Vec::new();
                for (key, child) in structure {
                    check_field(
                        &format!("{path}[0].{key}"),
                        child,
                        first.get(key),
                        &mut element_problems,
                        warnings,
                    );
                }
                warnings.extend(element_problems);
            }
        }
    }

    if let Some(rules) = &field.validation {
        for validator in rules.validators() {
            if let ValidationResult::Invalid(message) = validator.validate(value) {
                let message = rules.message.clone().unwrap_or(message);
                problems.push(format!("{path}: {message}"));
            }
        }
    }
}
