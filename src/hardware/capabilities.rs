//! Capability traits for microscope components.
//!
//! Plugins never talk to a concrete device. They ask the [`Microscope`]
//! registry for a component by role and receive one of these traits:
//!
//! - [`Movable`]: multi-axis stages (sample stage, focus)
//! - [`ScanRotation`]: the beam scan rotation of the FIB/SEM connection
//! - [`FrameSource`]: detectors producing 16-bit frames
//! - [`LightSource`]: excitation light with its emission spectra
//! - [`EmissionFilter`]: filter wheel with its pass bands
//!
//! Capability methods speak `anyhow`, like the drivers behind them.
//!
//! [`Microscope`]: crate::hardware::Microscope

use anyhow::Result;
use async_trait::async_trait;
use mill_core::Frame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Linear x (m)
    X,
    /// Linear y (m)
    Y,
    /// Linear z (m)
    Z,
    /// Tilt around x (rad)
    Rx,
    /// Rotation around z (rad)
    Rz,
}

impl Axis {
    /// Axis name as used by the hardware.
    pub fn as_str(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::Rx => "rx",
            Axis::Rz => "rz",
        }
    }

    /// Whether positions on this axis are angles.
    pub fn is_rotation(self) -> bool {
        matches!(self, Axis::Rx | Axis::Rz)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target positions (or shifts) per axis.
pub type AxisMoves = BTreeMap<Axis, f64>;

/// Build an [`AxisMoves`] from pairs.
pub fn axis_moves<const N: usize>(pairs: [(Axis, f64); N]) -> AxisMoves {
    pairs.into_iter().collect()
}

/// Multi-axis positioner.
///
/// A move call returns once the move completed. Axes in one call move
/// together; callers needing an order issue one call per axis.
#[async_trait]
pub trait Movable: Send + Sync {
    /// Axes this positioner drives.
    fn axes(&self) -> Vec<Axis>;

    /// Inclusive range of `axis`, `None` when the axis is not driven.
    fn axis_range(&self, axis: Axis) -> Option<(f64, f64)>;

    /// Move to absolute positions.
    async fn move_abs(&self, targets: AxisMoves) -> Result<()>;

    /// Move by relative shifts.
    async fn move_rel(&self, shifts: AxisMoves) -> Result<()>;

    /// Current position of every axis.
    async fn position(&self) -> Result<AxisMoves>;
}

/// Beam scan rotation, in radians.
///
/// Writing a rotation that differs from the operator's baseline by a small
/// offset is how milling jobs are triggered on the instrument side; the
/// instrument restores the baseline when the job ends.
#[async_trait]
pub trait ScanRotation: Send + Sync {
    /// Current rotation.
    async fn rotation(&self) -> Result<f64>;

    /// Set the rotation.
    async fn set_rotation(&self, radians: f64) -> Result<()>;
}

/// Acquisition parameters for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    /// Exposure time
    pub exposure: Duration,
    /// Pixel binning (horizontal, vertical)
    pub binning: (u32, u32),
}

impl Default for FrameRequest {
    fn default() -> Self {
        Self {
            exposure: Duration::from_millis(100),
            binning: (1, 1),
        }
    }
}

/// Detector producing 16-bit frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Unbinned sensor size (width, height).
    fn resolution(&self) -> (u32, u32);

    /// Acquire one frame.
    async fn acquire_frame(&self, request: FrameRequest) -> Result<Frame>;
}

/// An excitation spectrum: lower edge, peak and upper edge, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// 0% edge below the peak
    pub low: f64,
    /// Peak wavelength
    pub peak: f64,
    /// 0% edge above the peak
    pub high: f64,
}

/// A filter pass band, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Band {
    /// No filtering (reflected light)
    PassThrough,
    /// Pass band between two wavelengths
    Range {
        /// Lower edge
        low: f64,
        /// Upper edge
        high: f64,
    },
}

impl Band {
    /// Centre wavelength, `None` for pass-through.
    pub fn center(&self) -> Option<f64> {
        match self {
            Band::PassThrough => None,
            Band::Range { low, high } => Some((low + high) / 2.0),
        }
    }
}

/// Light source with selectable emission spectra.
pub trait LightSource: Send + Sync {
    /// Available spectra, indexed as the hardware indexes them.
    fn spectra(&self) -> Vec<Spectrum>;

    /// Maximum power per spectrum (W).
    fn max_power(&self) -> f64;
}

/// Filter wheel.
pub trait EmissionFilter: Send + Sync {
    /// Available bands, indexed by wheel position.
    fn bands(&self) -> Vec<Band>;
}
