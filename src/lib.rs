//! Cryo FIB/LM milling plugins.
//!
//! This library holds the plugins that automate rough milling on a cryogenic
//! FIB/LM microscope, together with the pieces they share:
//!
//! - [`app`]: the shared context (microscope, tab, features, streams)
//! - [`hardware`]: capability traits, the role registry and simulated devices
//! - [`stream`]: live and single-frame acquisition streams
//! - [`capture`] and [`export`]: snapshotting streams and writing images
//! - [`sequencer`]: the per-feature milling and imaging loop
//! - [`guard`]: tab preconditions of the guarded operations
//! - [`dialog`]: settings dialogs and the operator interface
//! - [`plugins`]: the plugins and their host
//!
//! Feature, observable and progress types live in the `mill_core` crate and
//! are re-exported here.

pub mod app;
pub mod capture;
pub mod config;
pub mod dialog;
pub mod error;
pub mod export;
pub mod guard;
pub mod hardware;
pub mod logging;
pub mod plugins;
pub mod sequencer;
pub mod stream;

pub use app::MainData;
pub use config::MillConfig;
pub use error::{AppResult, MillError};
pub use mill_core::{
    Feature, FeatureList, FeatureStatus, Frame, Observable, ProgressFuture, StagePosition,
};
pub use plugins::{Plugin, PluginHost};
