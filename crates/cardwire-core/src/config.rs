//! Runtime configuration.
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration.
//!
//! ```toml
//! mode = "production"
//! script_timeout_ms = 2000
//! origin = "https://dash.example.com"
//! cascade_policy = "explicit_only"
//! ```

use crate::error::ConfigError;
use crate::whitelist::AuditLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime mode. Debug access is only granted in development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Debug tooling may read exposed properties.
    #[default]
    Development,
    /// Debug access is denied.
    Production,
}

/// Which bindings a property change refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Bindings that declare or reference the property; when none do, every
    /// HTTP binding.
    #[default]
    HttpFallback,
    /// Only bindings that declare or reference the property.
    ExplicitOnly,
}

/// Platform-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime mode.
    pub mode: RuntimeMode,
    /// Audit log trims once it holds more entries than this.
    pub audit_log_capacity: usize,
    /// Entries dropped per trim.
    pub audit_log_trim: usize,
    /// Default scripted-provider timeout.
    pub script_timeout_ms: u64,
    /// Default HTTP timeout.
    pub http_timeout_ms: u64,
    /// Origin prepended to internal paths opened in a new context.
    pub origin: String,
    /// Binding refresh policy after a modify action.
    pub cascade_policy: CascadePolicy,
    /// Maximum depth of dataChange cascades between widgets.
    pub max_cascade_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Development,
            audit_log_capacity: 1000,
            audit_log_trim: 100,
            script_timeout_ms: 5000,
            http_timeout_ms: 10_000,
            origin: "http://localhost".to_string(),
            cascade_policy: CascadePolicy::HttpFallback,
            max_cascade_depth: 8,
        }
    }
}

impl RuntimeConfig {
    /// Parse from a TOML string.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit_log_capacity == 0 {
            return Err(invalid("audit_log_capacity", "must be positive"));
        }
        if self.audit_log_trim == 0 || self.audit_log_trim > self.audit_log_capacity {
            return Err(invalid(
                "audit_log_trim",
                "must be between 1 and audit_log_capacity",
            ));
        }
        if self.script_timeout_ms == 0 {
            return Err(invalid("script_timeout_ms", "must be positive"));
        }
        if self.http_timeout_ms == 0 {
            return Err(invalid("http_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    /// Audit log limits.
    #[must_use]
    pub const fn audit_limits(&self) -> AuditLimits {
        AuditLimits {
            capacity: self.audit_log_capacity,
            trim: self.audit_log_trim,
        }
    }

    /// Script timeout as a duration.
    #[must_use]
    pub const fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    /// HTTP timeout as a duration.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}
