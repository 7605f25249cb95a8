//! Custom error types for the application.
//!
//! `MillError` is the single error type returned by plugins, the sequencer,
//! capture/export and configuration loading. Using `thiserror`, every
//! underlying source converts with `?`:
//!
//! - **`Config`** / **`Configuration`**: layered configuration could not be
//!   loaded, or loaded values are semantically invalid.
//! - **`Core`**: feature store and frame validation errors from `mill_core`.
//! - **`Instrument`**: failures reported by hardware capabilities and
//!   observable parameters (both speak `anyhow`).
//! - **`Image`** / **`Tiff`**: exporter failures.
//! - **`FrameTimeout`** / **`RotationTimeout`**: a bounded poll gave up.
//! - **`ComponentNotFound`**: a plugin asked for hardware the microscope does
//!   not have. The plugin host treats this as "plugin unavailable".

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MillError>;

/// Application error type.
#[derive(Error, Debug)]
pub enum MillError {
    /// Layered configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration values are invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feature store or frame error.
    #[error(transparent)]
    Core(#[from] mill_core::CoreError),

    /// Error reported by a hardware capability or an observable parameter.
    #[error(transparent)]
    Instrument(#[from] anyhow::Error),

    /// No component registered under the requested role.
    #[error("Component with role '{0}' not found")]
    ComponentNotFound(String),

    /// Image encoding failed.
    #[error("Image export error: {0}")]
    Image(#[from] image::ImageError),

    /// TIFF encoding failed.
    #[error("TIFF export error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Nothing was captured for an export that needs at least one frame.
    #[error("Nothing to export to {0}")]
    EmptyExport(String),

    /// A stream never delivered its frame.
    #[error("Timed out after {timeout:?} waiting for a frame from stream '{stream}'")]
    FrameTimeout {
        /// Stream name
        stream: String,
        /// Poll timeout
        timeout: Duration,
    },

    /// The scan rotation never came back to its baseline.
    #[error("Scan rotation did not return to {baseline_rad} rad within {timeout:?}")]
    RotationTimeout {
        /// Baseline rotation in radians
        baseline_rad: f64,
        /// Poll timeout
        timeout: Duration,
    },

    /// No plugin registered the requested menu entry.
    #[error("Unknown menu entry '{0}'")]
    UnknownMenu(String),

    /// A menu definition could not be parsed.
    #[error("Invalid menu definition '{0}'")]
    InvalidMenu(String),

    /// A background task died.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
