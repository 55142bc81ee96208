//! Shared requirements, whitelists and manifests.

use cardwire_core::{
    AccessLevel, ComponentDataRequirement, DataFieldRequirement, PropertyType,
    PropertyWhitelistEntry, TriggerKind, UpdateConfig, ValidationRules, ValueType,
};

/// A text widget: one required `text` field.
pub fn text_requirement() -> ComponentDataRequirement {
    ComponentDataRequirement::new("Text").with_field(
        "text",
        DataFieldRequirement::value(ValueType::String, "displayed text").required(),
    )
}

/// A metric widget: required numeric `value` in 0..=100, optional `label`.
/// Accepts manual, timer and push triggers with a 1 s floor.
pub fn metric_requirement() -> ComponentDataRequirement {
    ComponentDataRequirement::new("Metric")
        .with_field(
            "value",
            DataFieldRequirement::value(ValueType::Number, "current reading")
                .required()
                .with_rules(ValidationRules::new().with_range(0.0, 100.0)),
        )
        .with_field(
            "label",
            DataFieldRequirement::value(ValueType::String, "caption"),
        )
        .with_update_config(UpdateConfig {
            supported_triggers: vec![TriggerKind::Manual, TriggerKind::Timer, TriggerKind::Push],
            recommended_interval: Some(5000),
            min_interval: Some(1000),
        })
}

/// Exposed properties of the text widget: writable `text` and `status`,
/// read-only `kind`, private `token`.
pub fn text_whitelist() -> Vec<PropertyWhitelistEntry> {
    vec![
        PropertyWhitelistEntry::new("text", PropertyType::String),
        PropertyWhitelistEntry::new("status", PropertyType::String),
        PropertyWhitelistEntry::new("kind", PropertyType::String).readonly(),
        PropertyWhitelistEntry::new("token", PropertyType::String).with_level(AccessLevel::Private),
    ]
}

/// A small board: a room picker, a temperature card fed by a script and an
/// alarm banner that reacts to the card's status.
pub const PLANT_BOARD: &str = r#"
cardwire: "0.1"
name: plant
widgets:
  picker:
    requirement:
      displayName: Picker
      fields:
        selection: { type: value, valueType: string, description: Selected room }
    whitelist:
      - { propertyName: selection, type: string }
  card:
    requirement:
      displayName: Card
      fields:
        value: { type: value, valueType: number, description: Reading, required: true }
        readings: { type: array, description: History }
      relationships:
        average: { type: calculated, inputs: [readings] }
    calculators:
      average: "readings | mean | round(1)"
    whitelist:
      - { propertyName: value, type: number }
      - { propertyName: status, type: string }
  banner:
    requirement:
      displayName: Banner
      fields:
        text: { type: value, valueType: string, description: Banner text }
    whitelist:
      - { propertyName: text, type: string }
instances:
  - id: picker
    type: picker
    state: { selection: a }
    interactions:
      - event: click
        responses:
          - action: modify
            modifyConfig: { targetComponentId: picker, targetProperty: selection, updateValue: b }
  - id: card
    type: card
    state: { status: ok }
    data:
      source:
        kind: script
        script: "rows | pluck(temp)"
        context:
          rows: [{ temp: 20 }, { temp: 21.5 }]
      mapping:
        - { sourcePath: "0", targetField: value }
        - { sourcePath: "", targetField: readings }
      dependsOn: [picker.selection]
    interactions:
      - event: dataChange
        watchedProperty: status
        condition: { operator: equals, value: critical }
        responses:
          - action: modify
            modifyConfig: { targetComponentId: banner, targetProperty: text, updateValue: ALERT }
  - id: banner
    type: banner
    state: { text: "" }
"#;
