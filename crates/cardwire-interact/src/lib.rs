//! Widget interactions for Cardwire.
//!
//! An [`InteractionConfig`] says: when this event fires (and, for
//! `dataChange`, the condition holds), run these responses. Responses either
//! navigate ([`JumpConfig`]) or modify another widget's property
//! ([`ModifyConfig`]). Every modify is gated by the property whitelist.
//!
//! ```
//! use cardwire_core::{NotificationBus, PropertyType, PropertyWhitelistEntry, WhitelistManager};
//! use cardwire_data::BindingRegistry;
//! use cardwire_interact::{
//!     EventPayload, InteractionConfig, InteractionEvent, InteractionManager, ModifyConfig,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let whitelist = Arc::new(WhitelistManager::default());
//! whitelist.register_whitelist("text", vec![PropertyWhitelistEntry::new("text", PropertyType::String)]);
//! let manager = InteractionManager::new(
//!     whitelist,
//!     Arc::new(NotificationBus::new()),
//!     Arc::new(BindingRegistry::new()),
//! );
//!
//! manager.register("title", "text", vec![], Default::default());
//! manager.register(
//!     "button",
//!     "text",
//!     vec![InteractionConfig::new(InteractionEvent::Click)
//!         .with_response(ModifyConfig::new("title", "text", json!("clicked")))],
//!     Default::default(),
//! );
//!
//! let results = manager.trigger_event("button", &InteractionEvent::Click, &EventPayload::new());
//! assert!(results[0].success);
//! assert_eq!(manager.property("title", "text"), Some(json!("clicked")));
//! ```

pub mod condition;
pub mod config;
mod error;
pub mod event;
pub mod manager;
pub mod navigator;
pub mod result;

pub use condition::{Condition, ConditionOperator};
pub use config::{
    ActionKind, InteractionConfig, InteractionResponse, JumpConfig, JumpKind, JumpTarget,
    ModifyConfig, UpdateMode,
};
pub use error::InteractionError;
pub use event::{EventPayload, InteractionEvent};
pub use manager::{InteractionManager, HISTORY_CAPACITY};
pub use navigator::{LogNavigator, NavigationError, NavigationRequest, Navigator};
pub use result::{HistoryEntry, InteractionResult, StateChange};
