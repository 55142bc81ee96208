//! Error types for manifest loading.

use cardwire_expr::ExpressionError;
use thiserror::Error;

/// A manifest could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not valid YAML for a manifest.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// The manifest file could not be read.
    #[error("cannot read {path}: {message}")]
    Io {
        /// File path.
        path: String,
        /// OS error message.
        message: String,
    },

    /// An embedded expression does not compile.
    #[error("{context}: {source}")]
    Expression {
        /// Where the expression appears.
        context: String,
        /// Parser error.
        #[source]
        source: ExpressionError,
    },

    /// The manifest parsed but refers to things it does not declare.
    #[error("invalid manifest: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
