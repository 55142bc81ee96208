//! Core types for Cardwire dashboards.
//!
//! This crate provides the pieces every other Cardwire crate builds on:
//! - Path resolution: [`resolve`], [`available_paths`], [`DataPath`]
//! - Data requirements: [`ComponentDataRequirement`] and the [`RequirementRegistry`]
//! - Data validation: [`DataValidator`], [`ValidationReport`]
//! - Property exposure: [`WhitelistManager`] with its audit log
//! - Notifications: [`NotificationBus`] keyed by widget instance id
//! - Runtime configuration: [`RuntimeConfig`]

pub mod bus;
pub mod config;
mod error;
pub mod path;
pub mod registry;
pub mod schema;
pub mod validation;
pub mod value;
pub mod whitelist;

pub use bus::{ChangeSource, Notification, NotificationBus, SubscriberId};
pub use config::{CascadePolicy, RuntimeConfig, RuntimeMode};
pub use error::{ConfigError, RegistryError, SchemaError, SchemaIssue};
pub use path::{available_paths, resolve, suggest_path, DataPath, PathInfo, PathSegment};
pub use registry::RequirementRegistry;
pub use schema::{
    Calculator, ComponentDataRequirement, DataFieldRequirement, DataRelationship, FieldShape,
    RelationshipKind, TriggerKind, UpdateConfig, ValidationRules, ValueType,
};
pub use validation::{DataValidator, ValidationReport, ValidationResult, Validator};
pub use value::FieldMap;
pub use whitelist::{
    AccessContext, AccessKind, AccessLevel, AccessLogEntry, AccessLogFilter, AccessResult,
    AccessSource, AuditLimits, ComponentWhitelist, DenialReason, PropertyType,
    PropertyWhitelistEntry, WhitelistManager,
};
