//! Error types for cardwire-data.

use std::time::Duration;
use thiserror::Error;

/// A data source failed to produce data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Connection or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {reason}")]
    Status {
        /// Status code.
        status: u16,
        /// Reason phrase.
        reason: String,
    },

    /// The source did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A script failed. Carries the script's own message.
    #[error("{0}")]
    Script(String),

    /// The response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The provider configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The provider does not support the operation.
    #[error("{kind} provider does not support {operation}")]
    Unsupported {
        /// Provider kind.
        kind: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// No async runtime is available to drive the provider.
    #[error("no async runtime available")]
    NoRuntime,
}

/// A pipeline could not run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// The pipeline has no mapping rules.
    #[error("pipeline has no mapping rules")]
    NoRules,

    /// A rule targets a field the requirement does not declare.
    #[error("mapping target '{0}' is not a declared field")]
    UnknownTarget(String),

    /// A pre-processing expression did not compile.
    #[error("invalid pre-processing step '{step}': {message}")]
    InvalidStep {
        /// Step source text.
        step: String,
        /// Parser message.
        message: String,
    },

    /// The provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A pre-processing step failed at runtime.
    #[error("pre-processing failed: {0}")]
    Preprocess(String),

    /// The mapped output failed validation under the enforce policy.
    #[error("output failed validation: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// A binding could not be started or run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    /// `start` was called outside an async runtime.
    #[error("no async runtime available")]
    NoRuntime,

    /// The binding was already stopped.
    #[error("binding '{0}' is stopped")]
    Stopped(String),

    /// The binding is not running.
    #[error("binding '{0}' is not running")]
    NotRunning(String),

    /// The binding's pipeline is invalid.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A trigger is not supported by the widget or provider.
    #[error("trigger '{trigger}' is not supported: {reason}")]
    UnsupportedTrigger {
        /// Trigger kind.
        trigger: String,
        /// Why it cannot be used.
        reason: String,
    },

    /// A binding with the same id is already registered.
    #[error("binding '{0}' is already registered")]
    Duplicate(String),
}
