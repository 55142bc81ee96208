//! Cardwire: data binding and interaction runtime for dashboard widgets.
//!
//! Widgets declare the data they need, providers fetch it, pipelines map it
//! into the declared shape and reactive bindings keep it fresh. Interactions
//! let one widget change another's whitelisted properties, which in turn
//! refreshes every binding that reads them.
//!
//! # Example
//!
//! ```
//! use cardwire::{yaml::Manifest, Platform, RuntimeConfig};
//!
//! let manifest = Manifest::from_yaml(r#"
//! cardwire: "0.1"
//! name: demo
//! widgets:
//!   label:
//!     requirement:
//!       displayName: Label
//!       fields:
//!         text: { type: value, valueType: string, description: Caption }
//!     whitelist:
//!       - { propertyName: text, type: string }
//! instances:
//!   - id: title
//!     type: label
//!     state: { text: Hello }
//! "#).unwrap();
//!
//! let platform = Platform::init(RuntimeConfig::default()).unwrap();
//! let report = platform.load_manifest(&manifest).unwrap();
//! assert_eq!(report.instances, 1);
//! assert_eq!(platform.property("title", "text"), Some(serde_json::json!("Hello")));
//! ```

#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::needless_pass_by_value,
    clippy::future_not_send
)]

pub use cardwire_core::*;
pub use cardwire_data as data;
pub use cardwire_expr as expr;
pub use cardwire_interact as interact;
pub use cardwire_yaml as yaml;

mod platform;

pub use platform::{LoadReport, Platform, PlatformError, RunOutcome};
