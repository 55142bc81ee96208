//! Dashboard manifest types.
//!
//! A manifest declares widget types, then the widget instances on the board
//! with their initial state, data binding and interactions.

use crate::error::ManifestError;
use crate::widget::WidgetDefinition;
use cardwire_core::{FieldMap, RuntimeConfig};
use cardwire_data::{
    DataSourceConfig, MappingRule, PropertyRef, TriggerConfig, ValidationPolicy,
};
use cardwire_expr::Script;
use cardwire_interact::{InteractionConfig, InteractionResponse};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Dashboard manifest loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version.
    pub cardwire: String,
    /// Dashboard name.
    pub name: String,
    /// Dashboard description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Runtime settings. Unset fields keep their defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,
    /// Widget types by name.
    #[serde(default)]
    pub widgets: BTreeMap<String, WidgetDefinition>,
    /// Widget instances, in board order.
    #[serde(default)]
    pub instances: Vec<InstanceDefinition>,
}

/// One widget on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDefinition {
    /// Instance id, unique within the manifest.
    pub id: String,
    /// Widget type.
    #[serde(rename = "type")]
    pub widget_type: String,
    /// Initial property values.
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub state: FieldMap,
    /// Data binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataBinding>,
    /// Interaction rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<InteractionConfig>,
}

/// Where an instance's data comes from and how it is shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBinding {
    /// Provider configuration. String fields may embed
    /// `{{ instance.property }}` templates.
    pub source: DataSourceConfig,
    /// Mapping rules.
    #[serde(default)]
    pub mapping: Vec<MappingRule>,
    /// Expressions run over the raw payload (bound to `data`) before mapping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preprocess: Vec<String>,
    /// Update triggers.
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    /// Properties whose change re-executes the binding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<PropertyRef>,
    /// What to do with output that fails validation.
    #[serde(default)]
    pub validation: ValidationPolicy,
    /// Skip delivery when the output did not change.
    #[serde(default)]
    pub skip_unchanged: bool,
}

impl Manifest {
    /// Parse a manifest from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ManifestError> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Read and parse a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let manifest = Self::from_yaml(&text)?;
        tracing::debug!(
            path = %path.display(),
            widgets = manifest.widgets.len(),
            instances = manifest.instances.len(),
            "manifest parsed"
        );
        Ok(manifest)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Runtime settings, defaults when none are given.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        self.runtime.clone().unwrap_or_default()
    }

    /// Look up an instance by id.
    #[must_use]
    pub fn instance(&self, id: &str) -> Option<&InstanceDefinition> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// Every problem with the manifest.
    ///
    /// Expression compile failures are reported here as well, so a manifest
    /// with no issues loads cleanly.
    #[must_use]
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push("manifest name is empty".to_string());
        }
        if let Some(runtime) = &self.runtime {
            if let Err(err) = runtime.validate() {
                issues.push(format!("runtime: {err}"));
            }
        }

        for (widget_type, definition) in &self.widgets {
            match definition.build_requirement(widget_type) {
                Ok(requirement) => issues.extend(
                    requirement
                        .issues()
                        .into_iter()
                        .map(|issue| format!("widget '{widget_type}': {issue}")),
                ),
                Err(ManifestError::Invalid(problems)) => issues.extend(problems),
                Err(other) => issues.push(other.to_string()),
            }
        }

        let mut seen = BTreeSet::new();
        for instance in &self.instances {
            if instance.id.trim().is_empty() {
                issues.push(format!("instance of type '{}' has no id", instance.widget_type));
            } else if !seen.insert(instance.id.as_str()) {
                issues.push(format!("duplicate instance id '{}'", instance.id));
            }
        }
        let ids: BTreeSet<&str> = self.instances.iter().map(|i| i.id.as_str()).collect();

        for instance in &self.instances {
            self.check_instance(instance, &ids, &mut issues);
        }
        issues
    }

    fn check_instance(&self, instance: &InstanceDefinition, ids: &BTreeSet<&str>, issues: &mut Vec<String>) {
        let id = &instance.id;
        let Some(widget) = self.widgets.get(&instance.widget_type) else {
            issues.push(format!(
                "instance '{id}': unknown widget type '{}'",
                instance.widget_type
            ));
            return;
        };

        if let Some(data) = &instance.data {
            if data.mapping.is_empty() {
                issues.push(format!("instance '{id}': data binding has no mapping rules"));
            }
            for rule in &data.mapping {
                if !widget.requirement.fields.contains_key(&rule.target_field) {
                    issues.push(format!(
                        "instance '{id}': mapping target '{}' is not a field of '{}'",
                        rule.target_field, instance.widget_type
                    ));
                }
            }
            for step in &data.preprocess {
                match Script::compile(step) {
                    Ok(script) => {
                        if let Some(other) = script.references().into_iter().find(|r| r != "data") {
                            issues.push(format!(
                                "instance '{id}': pre-processing step can only read 'data', found '{other}'"
                            ));
                        }
                    }
                    Err(err) => issues.push(format!("instance '{id}': pre-processing step: {err}")),
                }
            }
            for trigger in &data.triggers {
                if matches!(trigger, TriggerConfig::Timer { interval_ms: 0, .. }) {
                    issues.push(format!("instance '{id}': timer interval must be positive"));
                }
            }
            let templated = data.source.template_references();
            let references = data
                .depends_on
                .iter()
                .cloned()
                .chain(templated.iter().filter_map(|r| PropertyRef::parse(r)));
            for reference in references {
                if !ids.contains(reference.instance.as_str()) {
                    issues.push(format!(
                        "instance '{id}': depends on unknown instance '{}'",
                        reference.instance
                    ));
                }
            }
        }

        for (index, interaction) in instance.interactions.iter().enumerate() {
            for response in &interaction.responses {
                match response {
                    InteractionResponse::Modify { config } => {
                        if !ids.contains(config.target_component_id.as_str()) {
                            issues.push(format!(
                                "instance '{id}' interaction {index}: modify targets unknown instance '{}'",
                                config.target_component_id
                            ));
                        }
                    }
                    InteractionResponse::Jump { config } => {
                        if config.destination().is_none() {
                            issues.push(format!(
                                "instance '{id}' interaction {index}: jump has no destination"
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Fail with every issue, if there are any.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::Invalid(issues))
        }
    }
}
