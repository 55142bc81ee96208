//! Mapping / transform pipeline.
//!
//! A pipeline turns one provider payload into a validated widget field map:
//!
//! ```text
//! provider.fetch() -> pre-processing steps -> mapping rules
//!                  -> relationship values -> validation -> FieldMap
//! ```
//!
//! Pre-processing steps are expressions over `data`, each receiving the
//! previous step's output.

use crate::error::{PipelineError, ProviderError};
use crate::mapping::{apply_rules, MappingRule};
use crate::provider::DataProvider;
use cardwire_core::{ComponentDataRequirement, DataValidator, FieldMap, ValidationReport};
use cardwire_expr::{ExecutionLimits, Script, ScriptScope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// What to do when the mapped output fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Deliver anyway and log the problems.
    #[default]
    Warn,
    /// Fail the execution.
    Enforce,
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Completed executions.
    pub execution_count: u64,
    /// When the last execution completed.
    pub last_execution: Option<SystemTime>,
    /// Validation report of the last execution.
    pub last_report: Option<ValidationReport>,
}

/// Source, mapping and validation for one binding.
#[derive(Debug)]
pub struct DataPipeline {
    id: String,
    provider: Arc<dyn DataProvider>,
    requirement: Arc<ComponentDataRequirement>,
    rules: Vec<MappingRule>,
    preprocess: Vec<Script>,
    policy: ValidationPolicy,
    stats: Mutex<PipelineStats>,
}

impl DataPipeline {
    /// Create a pipeline without rules.
    #[must_use]
    pub fn new(
        id: &str,
        provider: Arc<dyn DataProvider>,
        requirement: Arc<ComponentDataRequirement>,
    ) -> Self {
        Self {
            id: id.to_string(),
            provider,
            requirement,
            rules: Vec::new(),
            preprocess: Vec::new(),
            policy: ValidationPolicy::Warn,
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    /// Add a mapping rule.
    #[must_use]
    pub fn with_rule(mut self, rule: MappingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add several mapping rules.
    #[must_use]
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = MappingRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Add a pre-processing step over `data`.
    pub fn with_preprocess(mut self, step: &str) -> Result<Self, PipelineError> {
        let script = Script::compile(step).map_err(|e| PipelineError::InvalidStep {
            step: step.to_string(),
            message: e.to_string(),
        })?;
        if let Some(other) = script.references().into_iter().find(|r| r != "data") {
            return Err(PipelineError::InvalidStep {
                step: step.to_string(),
                message: format!("steps can only read 'data', found '{other}'"),
            });
        }
        self.preprocess.push(script);
        Ok(self)
    }

    /// Set the validation policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pipeline id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bound provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    /// Bound requirement.
    #[must_use]
    pub fn requirement(&self) -> &Arc<ComponentDataRequirement> {
        &self.requirement
    }

    /// Mapping rules.
    #[must_use]
    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Pre-processing step sources.
    pub fn preprocess_steps(&self) -> impl Iterator<Item = &str> {
        self.preprocess.iter().map(Script::source)
    }

    /// Check that the pipeline can run.
    ///
    /// There must be at least one rule, every target must be a declared
    /// field, and the provider configuration must be usable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.rules.is_empty() {
            return Err(PipelineError::NoRules);
        }
        if let Some(rule) = self
            .rules
            .iter()
            .find(|rule| !self.requirement.fields.contains_key(&rule.target_field))
        {
            return Err(PipelineError::UnknownTarget(rule.target_field.clone()));
        }
        self.provider.validate_config()?;
        Ok(())
    }

    /// Fetch from the provider and map the payload.
    pub async fn execute(&self) -> Result<FieldMap, PipelineError> {
        self.validate()?;
        let raw = self.provider.fetch().await.map_err(|err: ProviderError| {
            tracing::warn!(pipeline = %self.id, error = %err, "provider fetch failed");
            PipelineError::Provider(err)
        })?;
        self.execute_with(&raw)
    }

    /// Map an already-obtained payload, such as a pushed message.
    pub fn execute_with(&self, raw: &Value) -> Result<FieldMap, PipelineError> {
        self.validate()?;
        let (fields, report) = self.run(raw)?;
        let mut stats = self.stats.lock().expect("pipeline stats lock poisoned");
        stats.execution_count += 1;
        stats.last_execution = Some(SystemTime::now());
        stats.last_report = Some(report);
        Ok(fields)
    }

    /// Map `raw` without recording statistics.
    pub fn preview(&self, raw: &Value) -> Result<FieldMap, PipelineError> {
        self.validate()?;
        self.run(raw).map(|(fields, _)| fields)
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().expect("pipeline stats lock poisoned").clone()
    }

    fn run(&self, raw: &Value) -> Result<(FieldMap, ValidationReport), PipelineError> {
        let mut data = raw.clone();
        for step in &self.preprocess {
            data = step
                .run(&ScriptScope::new().with("data", data), ExecutionLimits::default())
                .map_err(|e| PipelineError::Preprocess(e.to_string()))?;
        }

        let mut fields = apply_rules(&self.rules, &data);
        for (name, relationship) in &self.requirement.relationships {
            if fields.contains_key(name) {
                continue;
            }
            if let Some(value) = relationship.compute(name, &fields) {
                fields.insert(name.clone(), value);
            }
        }

        let report = DataValidator::validate(&self.requirement, &fields);
        if !report.valid {
            match self.policy {
                ValidationPolicy::Enforce => {
                    return Err(PipelineError::Validation(report.errors));
                }
                ValidationPolicy::Warn => {
                    tracing::warn!(
                        pipeline = %self.id,
                        errors = ?report.errors,
                        "mapped data failed validation"
                    );
                }
            }
        }
        Ok((fields, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ValueTransform;
    use crate::providers::{ScriptProvider, StaticProvider};
    use cardwire_core::{Calculator, DataFieldRequirement, DataRelationship, ValueType};
    use serde_json::json;

    fn sensor_requirement() -> Arc<ComponentDataRequirement> {
        Arc::new(
            ComponentDataRequirement::new("Sensor")
                .with_field(
                    "temperature",
                    DataFieldRequirement::value(ValueType::Number, "temperature").required(),
                )
                .with_field(
                    "isOnline",
                    DataFieldRequirement::value(ValueType::Boolean, "online flag"),
                )
                .with_field(
                    "location",
                    DataFieldRequirement::value(ValueType::String, "location"),
                ),
        )
    }

    fn sensor_provider() -> Arc<dyn DataProvider> {
        Arc::new(StaticProvider::new(
            json!({"sensor": {"temp": 23.5, "online": true}, "location": "room-a"}),
        ))
    }

    fn sensor_rules() -> Vec<MappingRule> {
        vec![
            MappingRule::new("sensor.temp", "temperature"),
            MappingRule::new("sensor.online", "isOnline"),
            MappingRule::new("location", "location"),
        ]
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn test_validate_requires_rules() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement());
        assert_eq!(pipeline.validate(), Err(PipelineError::NoRules));
    }

    #[test]
    fn test_validate_unknown_target() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_rule(MappingRule::new("x", "pressure"));
        assert_eq!(
            pipeline.validate(),
            Err(PipelineError::UnknownTarget("pressure".into()))
        );
    }

    #[test]
    fn test_validate_provider_config() {
        let provider = Arc::new(ScriptProvider::new("rows | count").expect("compiles"));
        let pipeline = DataPipeline::new("p", provider, sensor_requirement())
            .with_rule(MappingRule::new("", "temperature"));
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::Provider(ProviderError::InvalidConfig(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_pipeline_does_not_fetch() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement());
        assert_eq!(pipeline.execute().await, Err(PipelineError::NoRules));
        assert_eq!(pipeline.stats().execution_count, 0);
    }

    // =========================================================================
    // Execution
    // =========================================================================

    #[tokio::test]
    async fn test_execute_scenario() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_rules(sensor_rules());
        let fields = pipeline.execute().await.expect("executes");
        assert_eq!(
            Value::Object(fields),
            json!({"temperature": 23.5, "isOnline": true, "location": "room-a"})
        );
        let stats = pipeline.stats();
        assert_eq!(stats.execution_count, 1);
        assert!(stats.last_execution.is_some());
        assert!(stats.last_report.is_some_and(|r| r.valid));
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let provider = Arc::new(ScriptProvider::new("1 | limit(1)").expect("compiles"));
        let pipeline = DataPipeline::new("p", provider, sensor_requirement())
            .with_rule(MappingRule::new("", "temperature"));
        assert!(matches!(
            pipeline.execute().await,
            Err(PipelineError::Provider(ProviderError::Script(_)))
        ));
    }

    #[test]
    fn test_preview_leaves_stats() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_rules(sensor_rules());
        let fields = pipeline
            .preview(&json!({"sensor": {"temp": 1}}))
            .expect("maps");
        assert_eq!(fields.get("temperature"), Some(&json!(1)));
        assert_eq!(pipeline.stats().execution_count, 0);
    }

    #[test]
    fn test_preprocess_steps() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_rule(MappingRule::new("", "temperature"))
            .with_preprocess("data | where(online == true) | mean(temp) | round(1)")
            .expect("valid step");
        let raw = json!([
            {"temp": 20, "online": true},
            {"temp": 99, "online": false},
            {"temp": 21.5, "online": true}
        ]);
        let fields = pipeline.execute_with(&raw).expect("maps");
        assert_eq!(fields.get("temperature"), Some(&json!(20.8)));
        assert_eq!(pipeline.preprocess_steps().count(), 1);
    }

    #[test]
    fn test_preprocess_scope_is_data_only() {
        let result = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_preprocess("secrets | first");
        assert!(matches!(result, Err(PipelineError::InvalidStep { .. })));
    }

    #[test]
    fn test_enforce_policy() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_rule(MappingRule::new("missing", "temperature"))
            .with_policy(ValidationPolicy::Enforce);
        assert!(matches!(
            pipeline.execute_with(&json!({})),
            Err(PipelineError::Validation(_))
        ));

        let warn = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_rule(MappingRule::new("missing", "temperature"));
        assert!(warn.execute_with(&json!({})).is_ok());
        assert!(warn.stats().last_report.is_some_and(|r| !r.valid));
    }

    #[test]
    fn test_bad_rule_does_not_abort() {
        let pipeline = DataPipeline::new("p", sensor_provider(), sensor_requirement())
            .with_rule(
                MappingRule::new("sensor.temp", "temperature")
                    .with_transform(ValueTransform::new(|_| Err("boom".into())))
                    .with_default(json!(0)),
            )
            .with_rule(MappingRule::new("location", "location"));
        let fields = pipeline
            .execute_with(&json!({"sensor": {"temp": 5}, "location": "b"}))
            .expect("maps");
        assert_eq!(Value::Object(fields), json!({"temperature": 0, "location": "b"}));
    }

    #[test]
    fn test_relationship_values_added() {
        let requirement = Arc::new(
            ComponentDataRequirement::new("Comfort")
                .with_field(
                    "temperature",
                    DataFieldRequirement::value(ValueType::Number, "temperature"),
                )
                .with_field("humidity", DataFieldRequirement::value(ValueType::Number, "humidity"))
                .with_relationship(
                    "comfortIndex",
                    DataRelationship::calculated(
                        &["temperature", "humidity"],
                        Calculator::infallible(|inputs| {
                            json!(inputs.get("temperature") == Some(&json!(23)))
                        }),
                    ),
                ),
        );
        let pipeline = DataPipeline::new("p", sensor_provider(), requirement)
            .with_rule(MappingRule::new("t", "temperature"))
            .with_rule(MappingRule::new("h", "humidity"));
        let fields = pipeline.execute_with(&json!({"t": 23, "h": 60})).expect("maps");
        assert_eq!(fields.get("comfortIndex"), Some(&json!(true)));
    }
}
