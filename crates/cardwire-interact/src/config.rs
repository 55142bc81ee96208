//! Interaction configuration.
//!
//! ```yaml
//! - event: click
//!   priority: 10
//!   responses:
//!     - action: modify
//!       modifyConfig:
//!         targetComponentId: banner
//!         targetProperty: text
//!         updateValue: "!"
//!         updateMode: append
//!     - action: jump
//!       jumpConfig:
//!         jumpType: external
//!         url: https://example.com
//!         target: _blank
//! ```

use crate::condition::Condition;
use crate::event::InteractionEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where a jump opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JumpTarget {
    /// Replace the current view.
    #[default]
    #[serde(rename = "_self")]
    SelfView,
    /// Open a new context.
    #[serde(rename = "_blank")]
    Blank,
    /// Parent frame.
    #[serde(rename = "_parent")]
    Parent,
    /// Top-level frame.
    #[serde(rename = "_top")]
    Top,
}

impl JumpTarget {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SelfView => "_self",
            Self::Blank => "_blank",
            Self::Parent => "_parent",
            Self::Top => "_top",
        }
    }
}

/// External URL or internal route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpKind {
    /// Absolute URL.
    External,
    /// Path inside the host application.
    Internal,
}

/// A navigation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpConfig {
    /// External or internal.
    pub jump_type: JumpKind,
    /// Target URL for external jumps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Route for internal jumps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_path: Option<String>,
    /// Where to open.
    #[serde(default)]
    pub target: JumpTarget,
    /// Window features for new contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_features: Option<String>,
}

impl JumpConfig {
    /// Jump to an absolute URL.
    #[must_use]
    pub fn external(url: &str, target: JumpTarget) -> Self {
        Self {
            jump_type: JumpKind::External,
            url: Some(url.to_string()),
            internal_path: None,
            target,
            window_features: None,
        }
    }

    /// Jump to a route of the host application.
    #[must_use]
    pub fn internal(path: &str, target: JumpTarget) -> Self {
        Self {
            jump_type: JumpKind::Internal,
            url: None,
            internal_path: Some(path.to_string()),
            target,
            window_features: None,
        }
    }

    /// Set the window features.
    #[must_use]
    pub fn with_window_features(mut self, features: &str) -> Self {
        self.window_features = Some(features.to_string());
        self
    }

    /// URL or path this jump goes to.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match self.jump_type {
            JumpKind::External => self.url.as_deref(),
            JumpKind::Internal => self.internal_path.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }
}

/// How a modify response combines the new value with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Overwrite.
    #[default]
    Replace,
    /// Concatenate after the current text.
    Append,
    /// Concatenate before the current text.
    Prepend,
}

/// A property-modification response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyConfig {
    /// Instance to modify.
    pub target_component_id: String,
    /// Property to modify.
    pub target_property: String,
    /// Value to apply.
    pub update_value: Value,
    /// Combination mode.
    #[serde(default)]
    pub update_mode: UpdateMode,
}

impl ModifyConfig {
    /// Replace `property` of `target` with `value`.
    #[must_use]
    pub fn new(target: &str, property: &str, value: Value) -> Self {
        Self {
            target_component_id: target.to_string(),
            target_property: property.to_string(),
            update_value: value,
            update_mode: UpdateMode::Replace,
        }
    }

    /// Set the combination mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }
}

/// One response of an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum InteractionResponse {
    /// Navigate.
    Jump {
        /// Navigation settings.
        #[serde(rename = "jumpConfig")]
        config: JumpConfig,
    },
    /// Modify another instance's property.
    Modify {
        /// Modification settings.
        #[serde(rename = "modifyConfig")]
        config: ModifyConfig,
    },
}

impl InteractionResponse {
    /// Action kind.
    #[must_use]
    pub const fn action(&self) -> ActionKind {
        match self {
            Self::Jump { .. } => ActionKind::Jump,
            Self::Modify { .. } => ActionKind::Modify,
        }
    }
}

impl From<JumpConfig> for InteractionResponse {
    fn from(config: JumpConfig) -> Self {
        Self::Jump { config }
    }
}

impl From<ModifyConfig> for InteractionResponse {
    fn from(config: ModifyConfig) -> Self {
        Self::Modify { config }
    }
}

/// Response action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Navigation.
    Jump,
    /// Property modification.
    Modify,
    /// The event could not be dispatched at all.
    Dispatch,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jump => "jump",
            Self::Modify => "modify",
            Self::Dispatch => "dispatch",
        })
    }
}

const fn default_enabled() -> bool {
    true
}

/// An event → condition → responses rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionConfig {
    /// Triggering event.
    pub event: InteractionEvent,
    /// Responses, executed in order.
    pub responses: Vec<InteractionResponse>,
    /// Disabled configs never fire.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// For `dataChange`: only changes of this property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watched_property: Option<String>,
    /// For `dataChange`: condition on the new value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl InteractionConfig {
    /// Enabled config with no responses.
    #[must_use]
    pub const fn new(event: InteractionEvent) -> Self {
        Self {
            event,
            responses: Vec::new(),
            enabled: true,
            priority: 0,
            name: None,
            watched_property: None,
            condition: None,
        }
    }

    /// Add a response.
    #[must_use]
    pub fn with_response(mut self, response: impl Into<InteractionResponse>) -> Self {
        self.responses.push(response.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Only react to changes of `property`.
    #[must_use]
    pub fn watching(mut self, property: &str) -> Self {
        self.watched_property = Some(property.to_string());
        self
    }

    /// Gate on a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Disable the config.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
