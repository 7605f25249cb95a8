//! Error type for the core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using [`CoreError`].
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors raised by feature persistence and frame validation.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Reading or writing a feature file failed.
    #[error("Feature store I/O error at {path}: {source}")]
    FeatureIo {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A feature file exists but is not valid JSON for the expected layout.
    #[error("Malformed feature file {path}: {source}")]
    FeatureParse {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A feature file is larger than [`crate::limits::MAX_FEATURE_FILE_BYTES`].
    #[error("Feature file {path} is {bytes} bytes (maximum {max_bytes})")]
    FeatureFileTooLarge {
        /// File involved
        path: PathBuf,
        /// Actual size
        bytes: u64,
        /// Allowed size
        max_bytes: u64,
    },

    /// A status string that is not part of the status lattice.
    #[error("Unknown feature status '{0}'")]
    UnknownStatus(String),

    /// Width or height is zero.
    #[error("Frame dimensions {width}x{height} are empty")]
    EmptyFrame {
        /// Frame width
        width: u32,
        /// Frame height
        height: u32,
    },

    /// Width or height is above [`crate::limits::MAX_FRAME_SIDE`].
    #[error("Frame dimensions {width}x{height} exceed maximum {max_dimension}")]
    FrameDimensionsTooLarge {
        /// Frame width
        width: u32,
        /// Frame height
        height: u32,
        /// Allowed dimension
        max_dimension: u32,
    },

    /// Frame payload above [`crate::limits::MAX_FRAME_BYTES`].
    #[error("Frame size {bytes} bytes exceeds maximum {max_bytes} bytes")]
    FrameTooLarge {
        /// Actual size
        bytes: usize,
        /// Allowed size
        max_bytes: usize,
    },

    /// Arithmetic overflow while sizing a buffer.
    #[error("Size overflow while computing {context}")]
    SizeOverflow {
        /// What was being computed
        context: &'static str,
    },

    /// Pixel buffer length does not match the declared dimensions.
    #[error("Frame data has {actual} pixels, expected {expected}")]
    FrameDataMismatch {
        /// Pixels implied by width x height
        expected: usize,
        /// Pixels supplied
        actual: usize,
    },
}
