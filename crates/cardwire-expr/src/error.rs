//! Error types for cardwire-expr.

use thiserror::Error;

/// Expression parsing error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// Nothing to parse.
    #[error("empty expression")]
    EmptyExpression,
    /// Malformed input.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// Transform name not recognized.
    #[error("unknown transform: {0}")]
    UnknownTransform(String),
    /// Transform arguments could not be read.
    #[error("invalid argument for {0}")]
    InvalidArgument(String),
    /// A forbidden identifier appears outside string literals.
    #[error("forbidden identifier: {0}")]
    Forbidden(String),
}

/// Expression execution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The source path does not resolve.
    #[error("source not found: {0}")]
    SourceNotFound(String),
    /// The expression reads a name the scope does not provide.
    #[error("'{0}' is not available in this scope")]
    NotInScope(String),
    /// The transform needs an array.
    #[error("{0} expects an array")]
    ExpectedArray(String),
    /// The transform needs an object.
    #[error("{0} expects an object")]
    ExpectedObject(String),
    /// The transform cannot read the value.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// The step budget ran out.
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
    /// The deadline passed.
    #[error("script timed out")]
    Timeout,
}

/// Compile or run failure of a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The script did not parse.
    #[error(transparent)]
    Parse(#[from] ExpressionError),
    /// The script failed while running.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ExpressionError::UnknownTransform("explode".into()).to_string(),
            "unknown transform: explode"
        );
        assert_eq!(
            ExecutionError::NotInScope("window".into()).to_string(),
            "'window' is not available in this scope"
        );
        let err: ScriptError = ExecutionError::Timeout.into();
        assert_eq!(err.to_string(), "script timed out");
    }
}
