//! Widget type definitions.
//!
//! A widget definition carries the data requirement of a widget type and the
//! properties it exposes. Relationship calculators and custom field checks
//! are written as expressions:
//!
//! ```yaml
//! gauge:
//!   requirement:
//!     displayName: Gauge
//!     fields:
//!       readings: { type: array, description: Raw readings }
//!       unit: { type: value, valueType: string, description: Unit label }
//!     relationships:
//!       average: { type: calculated, inputs: [readings] }
//!   calculators:
//!     average: "readings | mean | round(1)"
//!   checks:
//!     unit: "value | count"
//!   whitelist:
//!     - propertyName: unit
//!       type: string
//! ```

use crate::error::ManifestError;
use cardwire_core::value::is_truthy;
use cardwire_core::{
    Calculator, ComponentDataRequirement, FieldMap, PropertyWhitelistEntry, RelationshipKind,
    ValidationRules,
};
use cardwire_expr::{ExecutionLimits, Script, ScriptScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declaration of one widget type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDefinition {
    /// Data requirement, without calculators.
    pub requirement: ComponentDataRequirement,
    /// Calculator expressions by relationship name. The relationship inputs
    /// are bound as scope names.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub calculators: BTreeMap<String, String>,
    /// Custom check expressions by field name. The field value is bound to
    /// `value`; a truthy result passes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, String>,
    /// Exposed properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub whitelist: Vec<PropertyWhitelistEntry>,
}

impl WidgetDefinition {
    /// Wrap a requirement with no expressions or exposed properties.
    #[must_use]
    pub fn new(requirement: ComponentDataRequirement) -> Self {
        Self {
            requirement,
            calculators: BTreeMap::new(),
            checks: BTreeMap::new(),
            whitelist: Vec::new(),
        }
    }

    /// Add a calculator expression.
    #[must_use]
    pub fn with_calculator(mut self, relationship: &str, expression: &str) -> Self {
        self.calculators
            .insert(relationship.to_string(), expression.to_string());
        self
    }

    /// Add a custom check expression.
    #[must_use]
    pub fn with_check(mut self, field: &str, expression: &str) -> Self {
        self.checks.insert(field.to_string(), expression.to_string());
        self
    }

    /// Expose a property.
    #[must_use]
    pub fn with_property(mut self, entry: PropertyWhitelistEntry) -> Self {
        self.whitelist.push(entry);
        self
    }

    /// Build the requirement with compiled calculators and checks attached.
    pub fn build_requirement(&self, widget_type: &str) -> Result<ComponentDataRequirement, ManifestError> {
        let mut requirement = self.requirement.clone();
        let mut problems = Vec::new();

        for (name, source) in &self.calculators {
            let Some(relationship) = requirement.relationships.get_mut(name) else {
                problems.push(format!(
                    "widget '{widget_type}': calculator for undeclared relationship '{name}'"
                ));
                continue;
            };
            if relationship.kind != RelationshipKind::Calculated {
                problems.push(format!(
                    "widget '{widget_type}': relationship '{name}' is not calculated"
                ));
                continue;
            }
            let script = compile(source, || {
                format!("widget '{widget_type}' relationship '{name}'")
            })?;
            if let Some(unknown) = script
                .references()
                .into_iter()
                .find(|r| !relationship.inputs.contains(r))
            {
                problems.push(format!(
                    "widget '{widget_type}': relationship '{name}' reads '{unknown}', which is not one of its inputs"
                ));
                continue;
            }
            relationship.calculator = Some(expression_calculator(script));
        }

        for (field, source) in &self.checks {
            let Some(requirement_field) = requirement.fields.get_mut(field) else {
                problems.push(format!(
                    "widget '{widget_type}': check for undeclared field '{field}'"
                ));
                continue;
            };
            let script = compile(source, || format!("widget '{widget_type}' check '{field}'"))?;
            if let Some(other) = script.references().into_iter().find(|r| r != "value") {
                problems.push(format!(
                    "widget '{widget_type}': check '{field}' can only read 'value', found '{other}'"
                ));
                continue;
            }
            let rules = requirement_field
                .validation
                .take()
                .unwrap_or_else(ValidationRules::new);
            requirement_field.validation = Some(rules.with_custom(move |value| {
                script
                    .run(
                        &ScriptScope::new().with("value", value.clone()),
                        ExecutionLimits::default(),
                    )
                    .is_ok_and(|out| is_truthy(&out))
            }));
        }

        if problems.is_empty() {
            Ok(requirement)
        } else {
            Err(ManifestError::Invalid(problems))
        }
    }
}

fn compile(source: &str, context: impl FnOnce() -> String) -> Result<Script, ManifestError> {
    Script::compile(source).map_err(|source| ManifestError::Expression {
        context: context(),
        source,
    })
}

fn expression_calculator(script: Script) -> Calculator {
    Calculator::new(move |inputs: &FieldMap| {
        let scope = inputs
            .iter()
            .fold(ScriptScope::new(), |scope, (name, value)| {
                scope.with(name, value.clone())
            });
        script
            .run(&scope, ExecutionLimits::default())
            .map_err(|e| e.to_string())
    })
}
