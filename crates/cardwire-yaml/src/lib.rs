//! YAML dashboard manifests for Cardwire.
//!
//! A manifest declares widget types (data requirement, calculators, exposed
//! properties) and the instances on the board (initial state, data binding,
//! interactions). [`Manifest::validate`] checks that everything it refers to
//! is declared and that every embedded expression compiles.

mod error;
mod manifest;
mod widget;

pub use error::ManifestError;
pub use manifest::{DataBinding, InstanceDefinition, Manifest};
pub use widget::WidgetDefinition;
