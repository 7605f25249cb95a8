//! Per-feature milling and imaging sequences.
//!
//! [`Sequencer::run_action`] visits every active feature: move there, image
//! it, trigger the milling job through the scan rotation, wait for the
//! instrument to restore the rotation, mark the feature and image it again.
//! [`Sequencer::acquire_images`] only moves and images.
//!
//! Both check for cancellation between steps, publish an expected end time
//! on the [`ProgressFuture`], and always finish by stopping every stream they
//! may have started.

use crate::app::MainData;
use crate::capture::{CaptureReport, ImageCapture};
use crate::config::SequenceConfig;
use crate::error::{AppResult, MillError};
use crate::hardware::capabilities::{axis_moves, Axis, Movable, ScanRotation};
use crate::hardware::roles;
use crate::stream::{Stream, StreamMarkers};
use mill_core::{
    poll_until, Feature, FeatureStatus, Observable, PollOutcome, PollPolicy, ProgressFuture,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Status suffix of the capture taken before milling.
pub const PRE_MILL_LABEL: &str = "PreMill";
/// Status suffix of image-only captures.
pub const IMAGE_ACQUISITION_LABEL: &str = "ImgAcq";

/// Milling job triggered for each feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MillAction {
    /// Stress relief cuts only
    ReliefCuts,
    /// Rough milling only
    RoughMilling,
    /// Relief cuts followed by rough milling
    ReliefCutsAndRoughMilling,
    /// Thinning to 2 µm
    Thin2um,
    /// Thinning to 1 µm
    Thin1um,
}

impl MillAction {
    /// Every action, by index.
    pub const ALL: [MillAction; 5] = [
        MillAction::ReliefCuts,
        MillAction::RoughMilling,
        MillAction::ReliefCutsAndRoughMilling,
        MillAction::Thin2um,
        MillAction::Thin1um,
    ];

    /// Index shown in the dialog.
    pub fn index(self) -> usize {
        match self {
            MillAction::ReliefCuts => 0,
            MillAction::RoughMilling => 1,
            MillAction::ReliefCutsAndRoughMilling => 2,
            MillAction::Thin2um => 3,
            MillAction::Thin1um => 4,
        }
    }

    /// Action at `index`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Label of the dialog choice.
    pub fn label(self) -> &'static str {
        match self {
            MillAction::ReliefCuts => "Relief cuts",
            MillAction::RoughMilling => "Rough milling",
            MillAction::ReliefCutsAndRoughMilling => "Relief cuts & rough milling",
            MillAction::Thin2um => "2 um milling",
            MillAction::Thin1um => "1 um milling",
        }
    }

    /// Status suffix of the capture taken after milling.
    pub fn file_label(self) -> &'static str {
        match self {
            MillAction::ReliefCuts => "Relief Cuts",
            MillAction::RoughMilling => "Rough Milling",
            MillAction::ReliefCutsAndRoughMilling => "RC and RM",
            MillAction::Thin2um => "2 um",
            MillAction::Thin1um => "1 um",
        }
    }

    /// Scan rotation offset selecting the job on the instrument (degrees).
    pub fn offset_deg(self) -> f64 {
        match self {
            MillAction::ReliefCuts => 0.012,
            MillAction::RoughMilling => 0.013,
            MillAction::ReliefCutsAndRoughMilling => 0.011,
            MillAction::Thin2um => 0.014,
            MillAction::Thin1um => 0.015,
        }
    }

    /// Whether the job leaves the feature rough milled.
    pub fn marks_rough_milled(self) -> bool {
        self.index() > 0
    }
}

/// Scan rotation (rad) triggering a job `offset_deg` away from `baseline_deg`.
pub fn rotation_target(baseline_deg: f64, offset_deg: f64) -> f64 {
    (baseline_deg + offset_deg).to_radians()
}

/// Time left for `total` sites when `done` took `elapsed`.
///
/// Before any site is done, every site counts `default_per_site`.
pub fn estimate_remaining(
    total: usize,
    done: usize,
    elapsed: Duration,
    default_per_site: Duration,
) -> Duration {
    let left = total.saturating_sub(done) as u32;
    if done == 0 {
        default_per_site * left
    } else {
        elapsed * left / done as u32
    }
}

/// How a sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every selected feature was processed
    Completed,
    /// The operator cancelled between two steps
    Cancelled,
}

/// Summary of one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceReport {
    /// How the sequence ended
    pub outcome: SequenceOutcome,
    /// Features fully processed, in order
    pub processed: Vec<String>,
    /// Captures taken, in order
    pub captures: Vec<CaptureReport>,
}

impl SequenceReport {
    fn new() -> Self {
        Self {
            outcome: SequenceOutcome::Completed,
            processed: Vec::new(),
            captures: Vec::new(),
        }
    }

    fn cancelled(mut self) -> Self {
        self.outcome = SequenceOutcome::Cancelled;
        self
    }
}

/// Hardware and settings a sequence runs with.
#[derive(Clone)]
pub struct MillingContext {
    /// Sample stage (x, y)
    pub stage: Arc<dyn Movable>,
    /// Objective focus (z)
    pub focus: Arc<dyn Movable>,
    /// FIB/SEM scan rotation
    pub scan_rotation: Arc<dyn ScanRotation>,
    /// Shared stream list
    pub streams: Observable<Vec<Arc<Stream>>>,
    /// Image capture
    pub capture: ImageCapture,
    /// Timing
    pub timing: SequenceConfig,
    /// Rotation the milling offsets are added to (degrees)
    pub baseline_rotation_deg: f64,
}

impl MillingContext {
    /// Context for the microscope and configuration of `main`.
    pub fn from_main(main: &MainData) -> AppResult<Self> {
        Ok(Self {
            stage: main.microscope.movable(roles::STAGE)?,
            focus: main.microscope.movable(roles::FOCUS)?,
            scan_rotation: main.microscope.scan_rotation(roles::SEM)?,
            streams: main.streams.clone(),
            capture: ImageCapture::from_config(&main.config.acquisition),
            timing: main.config.sequence.clone(),
            baseline_rotation_deg: main.config.beam.baseline_rotation_deg,
        })
    }
}

/// Runs the per-feature sequences.
#[derive(Clone)]
pub struct Sequencer {
    ctx: MillingContext,
}

impl Sequencer {
    /// Sequencer over `ctx`.
    pub fn new(ctx: MillingContext) -> Self {
        Self { ctx }
    }

    /// Mill every active feature with `action`.
    ///
    /// Feature statuses already advanced stay advanced when a later feature
    /// fails or the operator cancels.
    pub async fn run_action(
        &self,
        features: &[Feature],
        action: MillAction,
        progress: &ProgressFuture,
    ) -> AppResult<SequenceReport> {
        let selected: Vec<&Feature> = features
            .iter()
            .filter(|f| f.status() == FeatureStatus::Active)
            .collect();
        info!(
            action = action.label(),
            features = selected.len(),
            "starting milling sequence"
        );
        let result = self.mill_features(&selected, action, progress).await;
        self.finish(result, progress)
    }

    /// Image every feature not discarded.
    pub async fn acquire_images(
        &self,
        features: &[Feature],
        progress: &ProgressFuture,
    ) -> AppResult<SequenceReport> {
        let selected: Vec<&Feature> = features
            .iter()
            .filter(|f| f.status() != FeatureStatus::Deactive)
            .collect();
        info!(features = selected.len(), "starting image acquisition");
        let result = self.image_features(&selected, progress).await;
        self.finish(result, progress)
    }

    async fn mill_features(
        &self,
        features: &[&Feature],
        action: MillAction,
        progress: &ProgressFuture,
    ) -> AppResult<SequenceReport> {
        let mut report = SequenceReport::new();
        if !progress.set_running_or_notify_cancel() {
            return Ok(report.cancelled());
        }
        let baseline = self.ctx.scan_rotation.rotation().await?;
        let target = rotation_target(self.ctx.baseline_rotation_deg, action.offset_deg());
        let start = Instant::now();

        for (done, feature) in features.iter().enumerate() {
            self.publish_estimate(progress, features.len(), done, start);
            if progress.is_cancelled() {
                return Ok(report.cancelled());
            }

            self.move_to(feature).await?;
            sleep(self.ctx.timing.dwell).await;
            report.captures.push(self.capture(feature, PRE_MILL_LABEL).await?);
            sleep(self.ctx.timing.dwell).await;

            info!(
                feature = feature.name(),
                action = action.label(),
                rotation = target,
                "starting milling"
            );
            self.ctx.scan_rotation.set_rotation(target).await?;
            sleep(self.ctx.timing.rotation_settle).await;
            match self.wait_for_rotation(baseline, progress).await? {
                PollOutcome::Satisfied => {}
                PollOutcome::Cancelled => return Ok(report.cancelled()),
                PollOutcome::TimedOut => {
                    return Err(MillError::RotationTimeout {
                        baseline_rad: baseline,
                        timeout: self.ctx.timing.rotation_timeout.unwrap_or_default(),
                    })
                }
            }
            info!(feature = feature.name(), "milling finished");

            if action.marks_rough_milled() {
                feature.advance_status(FeatureStatus::RoughMilled);
            }
            report
                .captures
                .push(self.capture(feature, action.file_label()).await?);
            report.processed.push(feature.name().to_string());
        }
        Ok(report)
    }

    async fn image_features(
        &self,
        features: &[&Feature],
        progress: &ProgressFuture,
    ) -> AppResult<SequenceReport> {
        let mut report = SequenceReport::new();
        if !progress.set_running_or_notify_cancel() {
            return Ok(report.cancelled());
        }
        let start = Instant::now();

        for (done, feature) in features.iter().enumerate() {
            self.publish_estimate(progress, features.len(), done, start);
            if progress.is_cancelled() {
                return Ok(report.cancelled());
            }

            self.move_to(feature).await?;
            sleep(self.ctx.timing.dwell).await;
            report
                .captures
                .push(self.capture(feature, IMAGE_ACQUISITION_LABEL).await?);
            sleep(self.ctx.timing.dwell).await;
            report.processed.push(feature.name().to_string());
        }
        Ok(report)
    }

    fn publish_estimate(
        &self,
        progress: &ProgressFuture,
        total: usize,
        done: usize,
        start: Instant,
    ) {
        let remaining = estimate_remaining(
            total,
            done,
            start.elapsed(),
            self.ctx.timing.default_site_estimate,
        );
        debug!(done, total, ?remaining, "progress");
        progress.set_progress(Instant::now() + remaining);
    }

    async fn move_to(&self, feature: &Feature) -> AppResult<()> {
        let pos = feature.position();
        info!(
            feature = feature.name(),
            x = pos.x,
            y = pos.y,
            z = pos.z,
            "moving to feature"
        );
        self.ctx
            .stage
            .move_abs(axis_moves([(Axis::X, pos.x), (Axis::Y, pos.y)]))
            .await?;
        self.ctx.focus.move_abs(axis_moves([(Axis::Z, pos.z)])).await?;
        Ok(())
    }

    async fn capture(&self, feature: &Feature, status: &str) -> AppResult<CaptureReport> {
        let streams = self.ctx.streams.get();
        self.ctx
            .capture
            .acquire_and_save(&streams, feature.name(), status)
            .await
    }

    async fn wait_for_rotation(
        &self,
        baseline: f64,
        progress: &ProgressFuture,
    ) -> AppResult<PollOutcome> {
        let policy = PollPolicy::every(self.ctx.timing.rotation_poll_interval)
            .with_timeout(self.ctx.timing.rotation_timeout);
        let tolerance = self.ctx.timing.rotation_tolerance_rad;
        let rotation = self.ctx.scan_rotation.clone();
        let outcome = poll_until(policy, Some(progress), || {
            let rotation = rotation.clone();
            async move {
                let current = rotation.rotation().await?;
                debug!(current, baseline, "waiting for milling to finish");
                Ok((current - baseline).abs() < tolerance)
            }
        })
        .await?;
        Ok(outcome)
    }

    /// Stop every stream except electron ones, whatever the outcome.
    fn finish(
        &self,
        result: AppResult<SequenceReport>,
        progress: &ProgressFuture,
    ) -> AppResult<SequenceReport> {
        reset_streams(&self.ctx.streams.get(), self.ctx.capture.markers());
        match &result {
            Ok(report) if report.outcome == SequenceOutcome::Completed => {
                info!(processed = report.processed.len(), "sequence completed");
                progress.set_result();
            }
            Ok(report) => {
                info!(processed = report.processed.len(), "sequence cancelled");
            }
            Err(e) => {
                info!("sequence failed: {e}");
                progress.set_result();
            }
        }
        result
    }
}

/// Stop acquisition on every stream not excluded by `markers`.
pub fn reset_streams(streams: &[Arc<Stream>], markers: &StreamMarkers) {
    for stream in streams.iter().filter(|s| !markers.is_excluded(s.name())) {
        stream.set_should_update(false);
        stream.set_single_frame_acquisition(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_table() {
        let labels: Vec<&str> = MillAction::ALL.iter().map(|a| a.file_label()).collect();
        assert_eq!(
            labels,
            vec!["Relief Cuts", "Rough Milling", "RC and RM", "2 um", "1 um"]
        );
        assert_eq!(MillAction::from_index(2), Some(MillAction::ReliefCutsAndRoughMilling));
        assert_eq!(MillAction::from_index(5), None);
        assert!(!MillAction::ReliefCuts.marks_rough_milled());
        assert!(MillAction::Thin1um.marks_rough_milled());
        for action in MillAction::ALL {
            assert_eq!(MillAction::from_index(action.index()), Some(action));
        }
    }

    #[test]
    fn rotation_target_is_in_radians() {
        let target = rotation_target(180.0, 0.013);
        assert!((target - 180.013_f64.to_radians()).abs() < 1e-12);
        assert!((rotation_target(180.0, 0.0) - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn estimate_uses_default_until_a_site_is_done() {
        let per_site = Duration::from_secs(300);
        assert_eq!(
            estimate_remaining(4, 0, Duration::ZERO, per_site),
            Duration::from_secs(1200)
        );
        assert_eq!(
            estimate_remaining(4, 1, Duration::from_secs(100), per_site),
            Duration::from_secs(300)
        );
        assert_eq!(
            estimate_remaining(4, 4, Duration::from_secs(400), per_site),
            Duration::ZERO
        );
    }
}
