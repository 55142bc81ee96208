//! Data sources, pipelines and reactive bindings for Cardwire.
//!
//! ```text
//! DataProvider ──fetch/push──▶ DataPipeline ──FieldMap──▶ ReactiveBinding ──▶ on_update
//!   static | script | http        mapping rules              manual | timer | push
//!   telemetry | websocket         relationships
//!                                 validation
//! ```
//!
//! # Example
//!
//! ```
//! use cardwire_core::{ComponentDataRequirement, DataFieldRequirement, ValueType};
//! use cardwire_data::{DataPipeline, MappingRule, StaticProvider};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let requirement = ComponentDataRequirement::new("Gauge")
//!     .with_field("value", DataFieldRequirement::value(ValueType::Number, "reading"));
//! let provider = StaticProvider::new(json!({"sensor": {"temp": 23.5}}));
//! let pipeline = DataPipeline::new("gauge-1", Arc::new(provider), Arc::new(requirement))
//!     .with_rule(MappingRule::new("sensor.temp", "value"));
//!
//! let fields = pipeline.preview(&json!({"sensor": {"temp": 23.5}})).unwrap();
//! assert_eq!(fields["value"], json!(23.5));
//! ```

pub mod binding;
mod error;
pub mod mapping;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod source;

pub use binding::{BindingState, BindingStats, PropertyRef, ReactiveBinding, TriggerConfig};
pub use error::{BindingError, PipelineError, ProviderError};
pub use mapping::{apply_rules, MappingRule, ValueTransform};
pub use pipeline::{DataPipeline, PipelineStats, ValidationPolicy};
pub use provider::{DataProvider, ProviderKind, PushSink, Subscription};
pub use providers::{
    Aggregation, HttpMethod, HttpProvider, ReconnectConfig, ReqwestTransport, ScriptProvider,
    StaticProvider, TelemetryProvider, TelemetryQuery, TelemetryRequest, TelemetryTransport,
    TimeRange, WebSocketProvider,
};
pub use registry::{Affected, BindingRegistry, RegistryStats};
pub use source::{DataSourceConfig, PropertyLookup, TemplatedProvider};
