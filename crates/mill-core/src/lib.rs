//! Core types for cryo_mill.
//!
//! This crate holds the host-independent pieces shared by every plugin:
//!
//! - [`observable`]: watch-backed values with validation, used for settings,
//!   stream flags and shared lists
//! - [`feature`]: features (named stage positions with a status) and their
//!   JSON store
//! - [`frame`]: 16-bit detector frames, checked against [`limits`]
//! - [`progress`]: cancellable progress futures
//! - [`poll`]: poll-with-timeout for hardware that only reports completion
//!   through a readable value

pub mod error;
pub mod feature;
pub mod frame;
pub mod limits;
pub mod observable;
pub mod poll;
pub mod progress;

pub use error::{CoreError, CoreResult};
pub use feature::{Feature, FeatureList, FeatureStatus, StagePosition};
pub use frame::Frame;
pub use observable::{Observable, SettingSet};
pub use poll::{poll_until, PollOutcome, PollPolicy};
pub use progress::{ProgressFuture, TaskState};
