//! Component requirement registry.
//!
//! Widget types register their [`ComponentDataRequirement`] once. An invalid
//! requirement is never rejected outright: the registry stores the built-in
//! fallback requirement and reports the problems through `Err(SchemaError)`.
//!
//! # Example
//!
//! ```
//! use cardwire_core::registry::RequirementRegistry;
//! use cardwire_core::schema::ComponentDataRequirement;
//!
//! let registry = RequirementRegistry::new();
//! let result = registry.register("broken", ComponentDataRequirement::new("Broken"));
//! assert!(result.is_err());
//! // the widget type is still configured
//! assert!(registry.get("broken").is_some());
//! ```

use crate::error::{RegistryError, SchemaError};
use crate::schema::{
    ComponentDataRequirement, DataFieldRequirement, FieldShape, Structure, ValueType,
};
use crate::value::{number, FieldMap};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Registry of data requirements keyed by widget type.
#[derive(Debug, Default)]
pub struct RequirementRegistry {
    entries: RwLock<BTreeMap<String, Arc<ComponentDataRequirement>>>,
}

impl RequirementRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the requirement for a widget type.
    ///
    /// On validation failure the fallback requirement is stored instead and
    /// the problems are returned.
    pub fn register(
        &self,
        widget_type: &str,
        mut requirement: ComponentDataRequirement,
    ) -> Result<Arc<ComponentDataRequirement>, SchemaError> {
        requirement.normalize_names();
        let outcome = requirement.validate(widget_type);
        let stored = match &outcome {
            Ok(()) => Arc::new(requirement),
            Err(err) => {
                tracing::warn!(
                    widget_type = %widget_type,
                    error = %err,
                    "invalid requirement, using fallback"
                );
                let name = if requirement.display_name.is_empty() {
                    widget_type
                } else {
                    &requirement.display_name
                };
                Arc::new(ComponentDataRequirement::fallback(name))
            }
        };
        self.entries
            .write()
            .expect("requirement registry lock poisoned")
            .insert(widget_type.to_string(), Arc::clone(&stored));
        tracing::debug!(widget_type = %widget_type, "requirement registered");
        outcome.map(|()| stored)
    }

    /// Get the requirement for a widget type.
    #[must_use]
    pub fn get(&self, widget_type: &str) -> Option<Arc<ComponentDataRequirement>> {
        self.entries
            .read()
            .expect("requirement registry lock poisoned")
            .get(widget_type)
            .cloned()
    }

    fn require(&self, widget_type: &str) -> Result<Arc<ComponentDataRequirement>, RegistryError> {
        self.get(widget_type)
            .ok_or_else(|| RegistryError::UnknownWidgetType(widget_type.to_string()))
    }

    /// All registered requirements.
    #[must_use]
    pub fn all(&self) -> BTreeMap<String, Arc<ComponentDataRequirement>> {
        self.entries
            .read()
            .expect("requirement registry lock poisoned")
            .clone()
    }

    /// Check if a widget type is registered.
    #[must_use]
    pub fn contains(&self, widget_type: &str) -> bool {
        self.entries
            .read()
            .expect("requirement registry lock poisoned")
            .contains_key(widget_type)
    }

    /// Number of registered widget types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("requirement registry lock poisoned")
            .len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get one field of a widget type's requirement.
    #[must_use]
    pub fn field(&self, widget_type: &str, field: &str) -> Option<DataFieldRequirement> {
        self.get(widget_type)
            .and_then(|req| req.fields.get(field).cloned())
    }

    /// Field names of a widget type.
    #[must_use]
    pub fn field_names(&self, widget_type: &str) -> Vec<String> {
        self.get(widget_type)
            .map(|req| req.fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Required field names of a widget type.
    #[must_use]
    pub fn required_fields(&self, widget_type: &str) -> Vec<String> {
        self.get(widget_type)
            .map(|req| req.required_fields().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Optional field names of a widget type.
    #[must_use]
    pub fn optional_fields(&self, widget_type: &str) -> Vec<String> {
        self.get(widget_type)
            .map(|req| req.optional_fields().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Relationship names of a widget type.
    #[must_use]
    pub fn relationships(&self, widget_type: &str) -> Vec<String> {
        self.get(widget_type)
            .map(|req| req.relationships.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Replace one field of a registered requirement.
    ///
    /// The patched requirement is validated before it replaces the stored
    /// one; on failure the stored requirement is left untouched.
    pub fn patch_field(
        &self,
        widget_type: &str,
        name: &str,
        field: DataFieldRequirement,
    ) -> Result<Arc<ComponentDataRequirement>, RegistryError> {
        let current = self.require(widget_type)?;
        let mut patched = (*current).clone().with_field(name, field);
        patched.normalize_names();
        patched.validate(widget_type)?;

        let patched = Arc::new(patched);
        self.entries
            .write()
            .expect("requirement registry lock poisoned")
            .insert(widget_type.to_string(), Arc::clone(&patched));
        tracing::debug!(widget_type = %widget_type, field = %name, "requirement patched");
        Ok(patched)
    }

    /// Compute a relationship value.
    ///
    /// Returns `Ok(None)` when the relationship produces no value (missing
    /// input, failing calculator).
    pub fn calculate_relationship_value(
        &self,
        widget_type: &str,
        relationship: &str,
        inputs: &FieldMap,
    ) -> Result<Option<Value>, RegistryError> {
        let requirement = self.require(widget_type)?;
        let rel = requirement.relationships.get(relationship).ok_or_else(|| {
            RegistryError::UnknownRelationship {
                widget_type: widget_type.to_string(),
                relationship: relationship.to_string(),
            }
        })?;
        Ok(rel.compute(relationship, inputs))
    }

    /// Generate example data for a widget type.
    ///
    /// Each field uses its `example`, else its `default_value`, else a
    /// synthetic value. Relationship values are computed over the result
    /// and overlaid.
    pub fn generate_sample_data(&self, widget_type: &str) -> Result<FieldMap, RegistryError> {
        let requirement = self.require(widget_type)?;
        let mut sample = sample_structure(&requirement.fields);
        let overlay: Vec<(String, Value)> = requirement
            .relationships
            .iter()
            .filter_map(|(name, rel)| rel.compute(name, &sample).map(|v| (name.clone(), v)))
            .collect();
        sample.extend(overlay);
        Ok(sample)
    }

    /// Export every requirement as JSON. Calculators and custom checks are
    /// not included.
    #[must_use]
    pub fn export(&self) -> Value {
        let all = self.all();
        let map: FieldMap = all
            .iter()
            .filter_map(|(name, req)| {
                serde_json::to_value(req.as_ref())
                    .ok()
                    .map(|v| (name.clone(), v))
            })
            .collect();
        Value::Object(map)
    }

    /// Import requirements exported by [`export`](Self::export).
    ///
    /// Returns how many imported requirements were valid. Invalid ones are
    /// registered with the fallback like any other registration.
    pub fn import(&self, document: &Value) -> Result<usize, RegistryError> {
        let Value::Object(map) = document else {
            return Err(RegistryError::Import("expected an object".to_string()));
        };
        let mut valid = 0;
        for (widget_type, raw) in map {
            let requirement: ComponentDataRequirement = serde_json::from_value(raw.clone())
                .map_err(|e| RegistryError::Import(format!("{widget_type}: {e}")))?;
            if self.register(widget_type, requirement).is_ok() {
                valid += 1;
            }
        }
        Ok(valid)
    }

    /// Remove every requirement.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("requirement registry lock poisoned")
            .clear();
    }
}

fn sample_structure(structure: &Structure) -> FieldMap {
    structure
        .iter()
        .map(|(name, field)| (name.clone(), sample_field(name, field)))
        .collect()
}

fn sample_field(name: &str, field: &DataFieldRequirement) -> Value {
    if let Some(example) = &field.example {
        return example.clone();
    }
    if let Some(default) = &field.default_value {
        return default.clone();
    }
    match &field.shape {
        FieldShape::Value { value_type } => synthetic_scalar(name, *value_type),
        FieldShape::Object { structure } => structure
            .as_ref()
            .map_or_else(|| Value::Object(FieldMap::new()), |s| Value::Object(sample_structure(s))),
        FieldShape::Array { structure } => structure.as_ref().map_or_else(
            || Value::Array(Vec::new()),
            |s| Value::Array(vec![Value::Object(sample_structure(s)); 2]),
        ),
    }
}

fn synthetic_scalar(name: &str, value_type: ValueType) -> Value {
    match value_type {
        ValueType::Number => number(f64::from(name_hash(name) % 100)),
        ValueType::String => Value::String("sample text".to_string()),
        ValueType::Boolean => Value::Bool(name_hash(name) % 2 == 0),
        ValueType::Any => Value::String("sample data".to_string()),
    }
}

/// djb2 over the field name, so samples are stable between runs.
fn name_hash(name: &str) -> u32 {
    name.bytes()
        .fold(5381u32, |hash, byte| hash.wrapping_mul(33).wrapping_add(u32::from(byte)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Calculator, DataRelationship, UpdateConfig};
    use serde_json::json;

    fn inputs(value: Value) -> FieldMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn climate() -> ComponentDataRequirement {
        ComponentDataRequirement::new("Climate")
            .with_field(
                "temperature",
                DataFieldRequirement::value(ValueType::Number, "Temperature").required(),
            )
            .with_field(
                "humidity",
                DataFieldRequirement::value(ValueType::Number, "Humidity").required(),
            )
            .with_relationship(
                "comfortIndex",
                DataRelationship::calculated(
                    &["temperature", "humidity"],
                    Calculator::infallible(|inputs| {
                        let t = inputs.get("temperature").and_then(Value::as_f64).unwrap_or(0.0);
                        let h = inputs.get("humidity").and_then(Value::as_f64).unwrap_or(0.0);
                        if (18.0..=26.0).contains(&t) && (40.0..=70.0).contains(&h) {
                            json!("舒适")
                        } else {
                            json!("不适")
                        }
                    }),
                ),
            )
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[test]
    fn test_register_valid() {
        let registry = RequirementRegistry::new();
        let stored = registry.register("climate", climate()).expect("valid requirement");
        assert_eq!(stored.fields.len(), 2);
        assert!(registry.contains("climate"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_invalid_degrades_to_fallback() {
        let registry = RequirementRegistry::new();
        let broken = ComponentDataRequirement::new("Broken").with_field(
            "value",
            DataFieldRequirement::value(ValueType::Number, ""),
        );
        let err = registry.register("broken", broken).expect_err("missing description");
        assert_eq!(err.widget_type, "broken");

        let stored = registry.get("broken").expect("fallback stored");
        assert_eq!(registry.field_names("broken"), vec!["data"]);
        assert_eq!(stored.display_name, "Broken");
        assert_eq!(stored.update_config, UpdateConfig::default());
    }

    #[test]
    fn test_register_calculated_without_calculator_degrades() {
        let registry = RequirementRegistry::new();
        let req = climate().with_relationship(
            "bad",
            DataRelationship {
                kind: crate::schema::RelationshipKind::Calculated,
                inputs: vec!["temperature".into()],
                calculator: None,
                description: None,
            },
        );
        assert!(registry.register("climate", req).is_err());
        assert!(registry.relationships("climate").is_empty());
    }

    #[test]
    fn test_field_queries() {
        let registry = RequirementRegistry::new();
        let _ = registry.register(
            "card",
            climate().with_field("label", DataFieldRequirement::value(ValueType::String, "Label")),
        );
        assert_eq!(registry.required_fields("card"), vec!["humidity", "temperature"]);
        assert_eq!(registry.optional_fields("card"), vec!["label"]);
        assert_eq!(registry.relationships("card"), vec!["comfortIndex"]);
        assert!(registry.field("card", "label").is_some());
        assert!(registry.field("card", "nope").is_none());
        assert!(registry.field_names("unknown").is_empty());
    }

    #[test]
    fn test_patch_field() {
        let registry = RequirementRegistry::new();
        let _ = registry.register("climate", climate());
        let patched = registry
            .patch_field(
                "climate",
                "pressure",
                DataFieldRequirement::value(ValueType::Number, "Pressure"),
            )
            .expect("valid patch");
        assert!(patched.fields.contains_key("pressure"));

        let err = registry.patch_field(
            "climate",
            "broken",
            DataFieldRequirement::value(ValueType::Number, " "),
        );
        assert!(matches!(err, Err(RegistryError::Schema(_))));
        assert!(!registry.field_names("climate").contains(&"broken".to_string()));
    }

    #[test]
    fn test_clear() {
        let registry = RequirementRegistry::new();
        let _ = registry.register("climate", climate());
        registry.clear();
        assert!(registry.is_empty());
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    #[test]
    fn test_calculated_relationship_comfort_index() {
        let registry = RequirementRegistry::new();
        let _ = registry.register("climate", climate());
        let value = registry
            .calculate_relationship_value(
                "climate",
                "comfortIndex",
                &inputs(json!({"temperature": 23, "humidity": 60})),
            )
            .expect("known relationship");
        assert_eq!(value, Some(json!("舒适")));
    }

    #[test]
    fn test_independent_relationship_returns_input() {
        let registry = RequirementRegistry::new();
        let _ = registry.register(
            "climate",
            climate().with_relationship("temp", DataRelationship::independent("temperature")),
        );
        let value = registry
            .calculate_relationship_value(
                "climate",
                "temp",
                &inputs(json!({"temperature": 19.5, "humidity": 1})),
            )
            .expect("known relationship");
        assert_eq!(value, Some(json!(19.5)));
    }

    #[test]
    fn test_unknown_relationship_and_type() {
        let registry = RequirementRegistry::new();
        let _ = registry.register("climate", climate());
        assert!(matches!(
            registry.calculate_relationship_value("climate", "nope", &FieldMap::new()),
            Err(RegistryError::UnknownRelationship { .. })
        ));
        assert!(matches!(
            registry.calculate_relationship_value("ghost", "x", &FieldMap::new()),
            Err(RegistryError::UnknownWidgetType(_))
        ));
    }

    #[test]
    fn test_failing_calculator_yields_none() {
        let registry = RequirementRegistry::new();
        let req = climate().with_relationship(
            "explodes",
            DataRelationship::calculated(&["temperature"], Calculator::new(|_| Err("nope".into()))),
        );
        let _ = registry.register("climate", req);
        let value = registry
            .calculate_relationship_value("climate", "explodes", &FieldMap::new())
            .expect("known relationship");
        assert_eq!(value, None);
    }

    // =========================================================================
    // Sample data
    // =========================================================================

    #[test]
    fn test_sample_prefers_example_then_default() {
        let registry = RequirementRegistry::new();
        let req = ComponentDataRequirement::new("Card")
            .with_field(
                "a",
                DataFieldRequirement::value(ValueType::Number, "A")
                    .with_example(json!(1))
                    .with_default(json!(2)),
            )
            .with_field(
                "b",
                DataFieldRequirement::value(ValueType::Number, "B").with_default(json!(2)),
            )
            .with_field("c", DataFieldRequirement::value(ValueType::String, "C"))
            .with_field("d", DataFieldRequirement::value(ValueType::Any, "D"));
        let _ = registry.register("card", req);
        let sample = registry.generate_sample_data("card").expect("registered");
        assert_eq!(sample["a"], json!(1));
        assert_eq!(sample["b"], json!(2));
        assert_eq!(sample["c"], json!("sample text"));
        assert_eq!(sample["d"], json!("sample data"));
    }

    #[test]
    fn test_sample_nested_and_deterministic() {
        let registry = RequirementRegistry::new();
        let req = ComponentDataRequirement::new("Chart").with_field(
            "series",
            DataFieldRequirement::array("Series")
                .with_child("x", DataFieldRequirement::value(ValueType::Number, "X"))
                .with_child("ok", DataFieldRequirement::value(ValueType::Boolean, "Ok")),
        );
        let _ = registry.register("chart", req);
        let first = registry.generate_sample_data("chart").expect("registered");
        let second = registry.generate_sample_data("chart").expect("registered");
        assert_eq!(first, second);

        let series = first["series"].as_array().expect("array sample");
        assert_eq!(series.len(), 2);
        let x = series[0]["x"].as_f64().expect("number sample");
        assert!((0.0..100.0).contains(&x));
        assert!(series[0]["ok"].is_boolean());
    }

    #[test]
    fn test_sample_overlays_relationships() {
        let registry = RequirementRegistry::new();
        let req = ComponentDataRequirement::new("Climate")
            .with_field(
                "temperature",
                DataFieldRequirement::value(ValueType::Number, "T").with_example(json!(23)),
            )
            .with_field(
                "humidity",
                DataFieldRequirement::value(ValueType::Number, "H").with_example(json!(60)),
            )
            .with_relationship(
                "comfortIndex",
                climate().relationships["comfortIndex"].clone(),
            );
        let _ = registry.register("climate", req);
        let sample = registry.generate_sample_data("climate").expect("registered");
        assert_eq!(sample["comfortIndex"], json!("舒适"));
    }

    // =========================================================================
    // Export / import
    // =========================================================================

    #[test]
    fn test_export_import() {
        let source = RequirementRegistry::new();
        let _ = source.register(
            "gauge",
            ComponentDataRequirement::new("Gauge").with_field(
                "value",
                DataFieldRequirement::value(ValueType::Number, "Value").required(),
            ),
        );
        let exported = source.export();

        let target = RequirementRegistry::new();
        assert_eq!(target.import(&exported), Ok(1));
        assert_eq!(target.required_fields("gauge"), vec!["value"]);
        assert!(target.import(&json!([1, 2])).is_err());
    }
}
