//! Mock Hardware Implementations
//!
//! Provides simulated microscope components for testing without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockStage` - Multi-axis stage with range checks and a move log
//! - `MockScanRotation` - Scan rotation that restores its baseline after a simulated milling job
//! - `MockCamera` - Detector producing ramp frames
//! - `MockLight` - Four-line excitation source
//! - `MockFilter` - Five-position emission filter wheel
//!
//! # Performance Characteristics
//!
//! - MockStage: 1 mm/s linear speed, 0.1 rad/s rotation speed, 50ms settling time
//! - MockScanRotation: milling job lasts 30 s unless configured otherwise
//! - MockCamera: exposure time plus 10ms readout

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use mill_core::Frame;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use crate::hardware::capabilities::{
    Axis, AxisMoves, Band, EmissionFilter, FrameRequest, FrameSource, LightSource, Movable,
    ScanRotation, Spectrum,
};
use crate::hardware::{roles, Microscope};

// =============================================================================
// MockStage - Simulated Multi-Axis Stage
// =============================================================================

/// Settling time after every move.
const SETTLE_TIME: Duration = Duration::from_millis(50);

/// Mock stage with realistic timing
///
/// Simulates a stage with:
/// - per-axis ranges (moves outside are refused before anything moves)
/// - 1 mm/sec linear speed, 0.1 rad/sec rotation speed
/// - 50ms settling time after motion
/// - a log of every absolute target reached
/// - one-shot failure injection
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::sample_stage();
/// stage.move_abs(axis_moves([(Axis::X, 1e-3)])).await?; // Takes ~1 second
/// assert_eq!(stage.position().await?[&Axis::X], 1e-3);
/// ```
pub struct MockStage {
    name: String,
    ranges: BTreeMap<Axis, (f64, f64)>,
    position: Arc<RwLock<AxisMoves>>,
    linear_speed: f64,
    angular_speed: f64,
    history: Mutex<Vec<AxisMoves>>,
    failure: Mutex<Option<String>>,
}

impl MockStage {
    /// Create a stage driving `ranges`, every axis starting at 0 (clamped into range).
    pub fn new(name: impl Into<String>, ranges: BTreeMap<Axis, (f64, f64)>) -> Self {
        let position = ranges
            .iter()
            .map(|(axis, (low, high))| (*axis, 0.0_f64.clamp(*low, *high)))
            .collect();
        Self {
            name: name.into(),
            ranges,
            position: Arc::new(RwLock::new(position)),
            linear_speed: 1e-3,
            angular_speed: 0.1,
            history: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Five-axis sample stage of a cryo FIB/SEM.
    pub fn sample_stage() -> Self {
        Self::new(
            "Sample stage",
            BTreeMap::from([
                (Axis::X, (-0.05, 0.05)),
                (Axis::Y, (-0.05, 0.05)),
                (Axis::Z, (-0.01, 0.01)),
                (Axis::Rx, (-0.5, 0.5)),
                (Axis::Rz, (-3.2, 3.2)),
            ]),
        )
    }

    /// Single-axis objective focus.
    pub fn focus() -> Self {
        Self::new("Focus", BTreeMap::from([(Axis::Z, (-0.005, 0.005))]))
    }

    /// Set linear (m/s) and angular (rad/s) speeds.
    pub fn with_speed(mut self, linear: f64, angular: f64) -> Self {
        self.linear_speed = linear;
        self.angular_speed = angular;
        self
    }

    /// Absolute targets reached so far, one entry per successful move.
    pub fn history(&self) -> Vec<AxisMoves> {
        self.history.lock().clone()
    }

    /// Make the next move fail with `message`.
    pub fn fail_next_move(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    fn travel_time(&self, current: &AxisMoves, targets: &AxisMoves) -> Duration {
        let seconds = targets
            .iter()
            .map(|(axis, target)| {
                let distance = (target - current.get(axis).copied().unwrap_or(0.0)).abs();
                let speed = if axis.is_rotation() {
                    self.angular_speed
                } else {
                    self.linear_speed
                };
                distance / speed
            })
            .fold(0.0, f64::max);
        Duration::from_secs_f64(seconds) + SETTLE_TIME
    }

    fn check_targets(&self, targets: &AxisMoves) -> Result<()> {
        for (axis, target) in targets {
            let (low, high) = self
                .ranges
                .get(axis)
                .ok_or_else(|| anyhow!("{}: axis {} not supported", self.name, axis))?;
            if !(*low..=*high).contains(target) {
                bail!(
                    "{}: position {} out of range [{}, {}] for axis {}",
                    self.name,
                    target,
                    low,
                    high,
                    axis
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Movable for MockStage {
    fn axes(&self) -> Vec<Axis> {
        self.ranges.keys().copied().collect()
    }

    fn axis_range(&self, axis: Axis) -> Option<(f64, f64)> {
        self.ranges.get(&axis).copied()
    }

    async fn move_abs(&self, targets: AxisMoves) -> Result<()> {
        let failure = self.failure.lock().take();
        if let Some(message) = failure {
            bail!("{}: {}", self.name, message);
        }
        self.check_targets(&targets)?;

        let current = self.position.read().await.clone();
        let delay = self.travel_time(&current, &targets);
        debug!(stage = %self.name, ?targets, ?delay, "moving");

        // CRITICAL: Use tokio::time::sleep, NOT std::thread::sleep
        sleep(delay).await;

        let mut position = self.position.write().await;
        position.extend(targets.iter().map(|(axis, target)| (*axis, *target)));
        self.history.lock().push(targets);
        Ok(())
    }

    async fn move_rel(&self, shifts: AxisMoves) -> Result<()> {
        let current = self.position.read().await.clone();
        let targets = shifts
            .into_iter()
            .map(|(axis, shift)| (axis, current.get(&axis).copied().unwrap_or(0.0) + shift))
            .collect();
        self.move_abs(targets).await
    }

    async fn position(&self) -> Result<AxisMoves> {
        Ok(self.position.read().await.clone())
    }
}

// =============================================================================
// MockScanRotation - Simulated FIB/SEM Connection
// =============================================================================

/// Mock scan rotation
///
/// Any rotation written away from the baseline starts a simulated milling
/// job. When auto-restore is enabled, the rotation goes back to the baseline
/// once the job duration elapsed, unless another write happened meanwhile.
pub struct MockScanRotation {
    baseline: f64,
    rotation: Arc<RwLock<f64>>,
    job_duration: Option<Duration>,
    generation: Arc<AtomicU64>,
    writes: Mutex<Vec<f64>>,
}

impl MockScanRotation {
    /// Rotation resting at `baseline` radians, restoring it after `job_duration`.
    pub fn new(baseline: f64, job_duration: Option<Duration>) -> Self {
        Self {
            baseline,
            rotation: Arc::new(RwLock::new(baseline)),
            job_duration,
            generation: Arc::new(AtomicU64::new(0)),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Every rotation written, in order.
    pub fn writes(&self) -> Vec<f64> {
        self.writes.lock().clone()
    }

    /// Baseline rotation (rad).
    pub fn baseline(&self) -> f64 {
        self.baseline
    }
}

#[async_trait]
impl ScanRotation for MockScanRotation {
    async fn rotation(&self) -> Result<f64> {
        Ok(*self.rotation.read().await)
    }

    async fn set_rotation(&self, radians: f64) -> Result<()> {
        if !radians.is_finite() {
            bail!("scan rotation must be finite, got {}", radians);
        }
        self.writes.lock().push(radians);
        *self.rotation.write().await = radians;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(duration) = self.job_duration {
            if (radians - self.baseline).abs() > f64::EPSILON {
                info!(radians, ?duration, "Simulated milling job started");
                let rotation = self.rotation.clone();
                let current = self.generation.clone();
                let baseline = self.baseline;
                tokio::spawn(async move {
                    sleep(duration).await;
                    if current.load(Ordering::SeqCst) == generation {
                        *rotation.write().await = baseline;
                        info!("Simulated milling job finished");
                    }
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// MockCamera - Simulated Detector
// =============================================================================

/// Readout time added to every exposure.
const READOUT_TIME: Duration = Duration::from_millis(10);

/// Mock detector
///
/// Simulates a detector with:
/// - configurable resolution, divided by the requested binning
/// - exposure time plus 10ms readout
/// - ramp frames offset by the frame count
/// - a stall switch that makes acquisitions never complete
pub struct MockCamera {
    resolution: (u32, u32),
    frame_count: AtomicU64,
    stalled: AtomicBool,
}

impl MockCamera {
    /// Create new mock camera with specified resolution
    ///
    /// # Arguments
    /// * `width` - Frame width in pixels
    /// * `height` - Frame height in pixels
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            frame_count: AtomicU64::new(0),
            stalled: AtomicBool::new(false),
        }
    }

    /// Frames produced so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// Make acquisitions hang (or resume).
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    async fn acquire_frame(&self, request: FrameRequest) -> Result<Frame> {
        sleep(request.exposure + READOUT_TIME).await;
        while self.stalled.load(Ordering::SeqCst) {
            sleep(Duration::from_secs(1)).await;
        }

        let (bin_x, bin_y) = request.binning;
        if bin_x == 0 || bin_y == 0 {
            bail!("binning must be at least 1x1, got {}x{}", bin_x, bin_y);
        }
        let width = (self.resolution.0 / bin_x).max(1);
        let height = (self.resolution.1 / bin_y).max(1);
        let count = self.frame_count.fetch_add(1, Ordering::SeqCst);
        let data = (0..width * height)
            .map(|i| (u64::from(i) + count) as u16)
            .collect();
        Ok(Frame::new(width, height, data)?)
    }
}

// =============================================================================
// MockLight / MockFilter - Simulated Optical Path
// =============================================================================

/// Four-line light engine: 390, 485, 560 and 648 nm.
#[derive(Debug, Default)]
pub struct MockLight;

impl LightSource for MockLight {
    fn spectra(&self) -> Vec<Spectrum> {
        [
            (379e-9, 390e-9, 401e-9),
            (472e-9, 485e-9, 498e-9),
            (545e-9, 560e-9, 575e-9),
            (638e-9, 648e-9, 658e-9),
        ]
        .into_iter()
        .map(|(low, peak, high)| Spectrum { low, peak, high })
        .collect()
    }

    fn max_power(&self) -> f64 {
        0.1
    }
}

/// Five-position filter wheel: pass-through then 440, 525, 607 and 684 nm bands.
#[derive(Debug, Default)]
pub struct MockFilter;

impl EmissionFilter for MockFilter {
    fn bands(&self) -> Vec<Band> {
        let mut bands = vec![Band::PassThrough];
        bands.extend(
            [(420e-9, 460e-9), (505e-9, 545e-9), (587e-9, 627e-9), (664e-9, 704e-9)]
                .into_iter()
                .map(|(low, high)| Band::Range { low, high }),
        );
        bands
    }
}

// =============================================================================
// Simulated microscope
// =============================================================================

/// Handles on the devices of [`simulated_microscope`], for inspection in tests.
#[derive(Clone)]
pub struct SimulatedDevices {
    /// Sample stage
    pub stage: Arc<MockStage>,
    /// Objective focus
    pub focus: Arc<MockStage>,
    /// FIB/SEM connection
    pub scan_rotation: Arc<MockScanRotation>,
    /// Optical camera
    pub ccd: Arc<MockCamera>,
    /// Secondary electron detector
    pub se_detector: Arc<MockCamera>,
}

/// Build a complete cryo FIB/LM microscope.
///
/// The scan rotation rests at `baseline_rad` and every milling job lasts
/// `job_duration`.
pub fn simulated_microscope(
    baseline_rad: f64,
    job_duration: Duration,
) -> (Microscope, SimulatedDevices) {
    let devices = SimulatedDevices {
        stage: Arc::new(MockStage::sample_stage()),
        focus: Arc::new(MockStage::focus()),
        scan_rotation: Arc::new(MockScanRotation::new(baseline_rad, Some(job_duration))),
        ccd: Arc::new(MockCamera::new(64, 64)),
        se_detector: Arc::new(MockCamera::new(64, 64)),
    };
    let microscope = Microscope::new("Simulated cryo FIB/LM")
        .with_movable(roles::STAGE, devices.stage.clone())
        .with_movable(roles::FOCUS, devices.focus.clone())
        .with_scan_rotation(roles::SEM, devices.scan_rotation.clone())
        .with_frame_source(roles::CCD, devices.ccd.clone())
        .with_frame_source(roles::SE_DETECTOR, devices.se_detector.clone())
        .with_light_source(roles::LIGHT, Arc::new(MockLight))
        .with_emission_filter(roles::FILTER, Arc::new(MockFilter));
    (microscope, devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::axis_moves;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn stage_moves_take_time_and_are_logged() {
        let stage = MockStage::sample_stage();
        let start = Instant::now();
        stage
            .move_abs(axis_moves([(Axis::X, 2e-3), (Axis::Y, -1e-3)]))
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        let position = stage.position().await.unwrap();
        assert_eq!(position[&Axis::X], 2e-3);
        assert_eq!(position[&Axis::Y], -1e-3);
        assert_eq!(stage.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stage_refuses_out_of_range_and_unknown_axes() {
        let focus = MockStage::focus();
        assert!(focus.move_abs(axis_moves([(Axis::Z, 1.0)])).await.is_err());
        assert!(focus.move_abs(axis_moves([(Axis::X, 0.0)])).await.is_err());
        assert!(focus.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn relative_moves_add_to_the_position() {
        let focus = MockStage::focus();
        focus.move_rel(axis_moves([(Axis::Z, 50e-6)])).await.unwrap();
        focus.move_rel(axis_moves([(Axis::Z, 50e-6)])).await.unwrap();
        let z = focus.position().await.unwrap()[&Axis::Z];
        assert!((z - 100e-6).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_failure_hits_once() {
        let stage = MockStage::sample_stage();
        stage.fail_next_move("axis x stalled");
        let err = stage.move_abs(axis_moves([(Axis::X, 0.0)])).await.unwrap_err();
        assert!(err.to_string().contains("axis x stalled"));
        assert!(stage.move_abs(axis_moves([(Axis::X, 0.0)])).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_restores_baseline_after_job() {
        let rotation = MockScanRotation::new(std::f64::consts::PI, Some(Duration::from_secs(30)));
        rotation.set_rotation(3.2).await.unwrap();
        assert_eq!(rotation.rotation().await.unwrap(), 3.2);

        sleep(Duration::from_secs(31)).await;
        assert_eq!(rotation.rotation().await.unwrap(), std::f64::consts::PI);
        assert_eq!(rotation.writes(), vec![3.2]);
    }

    #[tokio::test(start_paused = true)]
    async fn later_write_cancels_pending_restore() {
        let rotation = MockScanRotation::new(0.0, Some(Duration::from_secs(10)));
        rotation.set_rotation(0.1).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        rotation.set_rotation(0.2).await.unwrap();
        sleep(Duration::from_secs(6)).await;
        assert_eq!(rotation.rotation().await.unwrap(), 0.2);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(rotation.rotation().await.unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn camera_bins_and_counts_frames() {
        let camera = MockCamera::new(64, 32);
        let frame = camera
            .acquire_frame(FrameRequest {
                exposure: Duration::from_millis(500),
                binning: (2, 2),
            })
            .await
            .unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 16));
        assert_eq!(camera.frame_count(), 1);
    }

    #[test]
    fn optical_path_indices() {
        assert_eq!(MockLight.spectra().len(), 4);
        let bands = MockFilter.bands();
        assert_eq!(bands.len(), 5);
        assert_eq!(bands[0], Band::PassThrough);
    }
}
