#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::new_without_default)]
#![allow(clippy::missing_const_for_fn)]
//! Test doubles and fixtures for Cardwire.
//!
//! - Providers: [`CountingProvider`], [`FailingProvider`], [`ManualPushProvider`]
//! - Recorders: [`RecordingNavigator`], [`BusRecorder`]
//! - Fixtures: sample requirements, whitelists and the [`PLANT_BOARD`] manifest

pub mod fixtures;
pub mod providers;
pub mod recorders;

pub use fixtures::{metric_requirement, text_requirement, text_whitelist, PLANT_BOARD};
pub use providers::{CountingProvider, FailingProvider, ManualPushProvider};
pub use recorders::{BusRecorder, RecordingNavigator};
