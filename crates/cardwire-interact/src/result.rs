//! Response outcomes and event history.

use crate::config::ActionKind;
use crate::event::InteractionEvent;
use serde::Serialize;
use serde_json::Value;
use std::time::SystemTime;

/// Outcome of one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionResult {
    /// Whether the response took effect.
    pub success: bool,
    /// Instance the response acted on.
    pub component_id: String,
    /// Response kind.
    pub action: ActionKind,
    /// Value before a modify.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after a modify, or the jump destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InteractionResult {
    pub(crate) fn succeeded(
        component_id: &str,
        action: ActionKind,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            success: true,
            component_id: component_id.to_string(),
            action,
            old_value,
            new_value,
            error: None,
        }
    }

    pub(crate) fn failed(component_id: &str, action: ActionKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            component_id: component_id.to_string(),
            action,
            old_value: None,
            new_value: None,
            error: Some(error.into()),
        }
    }
}

/// A state field whose value changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    /// Field name.
    pub property: String,
    /// Value before the write, `None` if the field was absent.
    pub old_value: Option<Value>,
    /// Value after the write.
    pub new_value: Value,
}

/// One dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Instance the event was dispatched to.
    pub instance_id: String,
    /// Event.
    pub event: InteractionEvent,
    /// When it was dispatched.
    pub timestamp: SystemTime,
    /// Responses executed.
    pub responses: usize,
    /// Responses that failed.
    pub failures: usize,
    /// Cascade depth (0 for host-dispatched events).
    pub depth: usize,
}
