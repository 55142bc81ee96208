//! Error types for cardwire-core.

use thiserror::Error;

/// A single problem found in a requirement definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaIssue {
    /// The requirement declares no fields.
    #[error("requirement declares no fields")]
    NoFields,

    /// A field (or nested structure field) has an empty description.
    #[error("field '{field}' has no description")]
    MissingDescription {
        /// Dotted field path.
        field: String,
    },

    /// An object or array field declares an empty nested structure.
    #[error("field '{field}' declares an empty structure")]
    EmptyStructure {
        /// Dotted field path.
        field: String,
    },

    /// `min` is greater than `max` in a field's validation rules.
    #[error("field '{field}' has min greater than max")]
    InvalidRange {
        /// Dotted field path.
        field: String,
    },

    /// A validation pattern is not a valid regular expression.
    #[error("field '{field}' has an invalid pattern: {message}")]
    InvalidPattern {
        /// Dotted field path.
        field: String,
        /// Regex compiler message.
        message: String,
    },

    /// A relationship lists no inputs.
    #[error("relationship '{relationship}' has no inputs")]
    EmptyInputs {
        /// Relationship name.
        relationship: String,
    },

    /// A relationship input does not name a declared field.
    #[error("relationship '{relationship}' references undeclared field '{input}'")]
    UnknownInput {
        /// Relationship name.
        relationship: String,
        /// The offending input name.
        input: String,
    },

    /// A calculated relationship has no calculator.
    #[error("calculated relationship '{relationship}' has no calculator")]
    MissingCalculator {
        /// Relationship name.
        relationship: String,
    },
}

/// A requirement was rejected at registration.
///
/// The registry still stores the default requirement for the widget type;
/// this error only reports what was wrong with the submitted one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid requirement for '{widget_type}': {}", join_issues(.issues))]
pub struct SchemaError {
    /// Widget type the requirement was registered for.
    pub widget_type: String,
    /// Every problem found, in declaration order.
    pub issues: Vec<SchemaIssue>,
}

fn join_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from registry queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No requirement is registered for the widget type.
    #[error("no requirement registered for widget type '{0}'")]
    UnknownWidgetType(String),

    /// The requirement has no relationship with this name.
    #[error("widget type '{widget_type}' has no relationship '{relationship}'")]
    UnknownRelationship {
        /// Widget type.
        widget_type: String,
        /// Relationship name.
        relationship: String,
    },

    /// The requirement has no field with this name.
    #[error("widget type '{widget_type}' has no field '{field}'")]
    UnknownField {
        /// Widget type.
        widget_type: String,
        /// Field name.
        field: String,
    },

    /// A hot patch produced an invalid requirement.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// An import document was malformed.
    #[error("import failed: {0}")]
    Import(String),
}

/// Errors loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML document could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display_lists_issues() {
        let err = SchemaError {
            widget_type: "gauge".into(),
            issues: vec![
                SchemaIssue::NoFields,
                SchemaIssue::MissingCalculator {
                    relationship: "comfort".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "invalid requirement for 'gauge': requirement declares no fields; \
             calculated relationship 'comfort' has no calculator"
        );
    }

    #[test]
    fn test_registry_error_from_schema() {
        let err: RegistryError = SchemaError {
            widget_type: "t".into(),
            issues: vec![SchemaIssue::NoFields],
        }
        .into();
        assert!(matches!(err, RegistryError::Schema(_)));
    }
}
