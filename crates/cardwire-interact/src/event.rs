//! Interaction events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Events a widget instance can react to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InteractionEvent {
    /// Pointer click.
    Click,
    /// Pointer hover.
    Hover,
    /// Focus gained.
    Focus,
    /// Focus lost.
    Blur,
    /// A property of the instance changed.
    DataChange,
    /// Host-defined event.
    Custom(String),
}

impl InteractionEvent {
    /// Wire name. Custom events are written `custom:<name>`.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Click => "click".into(),
            Self::Hover => "hover".into(),
            Self::Focus => "focus".into(),
            Self::Blur => "blur".into(),
            Self::DataChange => "dataChange".into(),
            Self::Custom(name) => format!("custom:{name}"),
        }
    }
}

impl fmt::Display for InteractionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for InteractionEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "click" => Self::Click,
            "hover" => Self::Hover,
            "focus" => Self::Focus,
            "blur" => Self::Blur,
            "dataChange" => Self::DataChange,
            "" | "custom" | "custom:" => return Err(format!("invalid event name '{s}'")),
            other => Self::Custom(other.strip_prefix("custom:").unwrap_or(other).to_string()),
        })
    }
}

impl TryFrom<String> for InteractionEvent {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InteractionEvent> for String {
    fn from(value: InteractionEvent) -> Self {
        value.name()
    }
}

/// Data carried by an event.
///
/// `dataChange` events fill `property`, `old_value` and `new_value`; other
/// events may carry anything in `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventPayload {
    /// Changed property.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Value before the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Free-form event data.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl EventPayload {
    /// Empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload describing a property change.
    #[must_use]
    pub fn change(property: &str, old_value: Option<Value>, new_value: Value) -> Self {
        Self {
            property: Some(property.to_string()),
            old_value,
            new_value: Some(new_value),
            data: Value::Null,
        }
    }

    /// Payload carrying free-form data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names() {
        for (name, event) in [
            ("click", InteractionEvent::Click),
            ("dataChange", InteractionEvent::DataChange),
            ("custom:alarm", InteractionEvent::Custom("alarm".into())),
        ] {
            assert_eq!(name.parse::<InteractionEvent>(), Ok(event.clone()));
            assert_eq!(event.to_string(), name);
        }
        assert_eq!(
            "alarm".parse::<InteractionEvent>(),
            Ok(InteractionEvent::Custom("alarm".into()))
        );
        assert!("".parse::<InteractionEvent>().is_err());
    }

    #[test]
    fn test_payload_serde() {
        let payload: EventPayload = serde_json::from_value(json!({
            "property": "status",
            "newValue": "critical"
        }))
        .expect("valid");
        assert_eq!(payload, EventPayload::change("status", None, json!("critical")));
        assert_eq!(
            serde_json::to_value(EventPayload::new().with_data(json!({"x": 1}))).expect("serializes"),
            json!({"data": {"x": 1}})
        );
    }
}
