//! Error types for cardwire-interact.

use cardwire_core::DenialReason;
use thiserror::Error;

/// A state update was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionError {
    /// No instance with this id is registered.
    #[error("component {0} is not registered")]
    UnknownInstance(String),

    /// The whitelist denied the write.
    #[error("{instance}.{property}: {reason}")]
    Denied {
        /// Target instance.
        instance: String,
        /// Target property.
        property: String,
        /// Denial reason.
        reason: DenialReason,
    },
}
