//! Per-feature image capture.
//!
//! [`ImageCapture::acquire_and_save`] snapshots every matching stream once,
//! writes one file per stream and one combined file, then puts the reference
//! stream back into live mode.

use crate::config::AcquisitionConfig;
use crate::error::{AppResult, MillError};
use crate::export::{FileNamer, ImageExporter, StreamFrame};
use crate::stream::{Stream, StreamMarkers};
use chrono::Local;
use mill_core::{poll_until, PollOutcome, PollPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Files written by one capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureReport {
    /// Streams captured, in order
    pub streams: Vec<String>,
    /// One file per captured stream
    pub files: Vec<PathBuf>,
    /// Combined file, absent when no stream matched
    pub combined: Option<PathBuf>,
}

/// Captures and exports stream snapshots.
#[derive(Clone)]
pub struct ImageCapture {
    markers: StreamMarkers,
    namer: FileNamer,
    exporter: Arc<dyn ImageExporter>,
    poll: PollPolicy,
}

impl ImageCapture {
    /// Capture set up from the acquisition configuration.
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            markers: StreamMarkers::from_config(config),
            namer: FileNamer::new(config.picture_dir(), config.format),
            exporter: config.format.exporter(),
            poll: PollPolicy::every(config.frame_poll_interval).with_timeout(config.frame_timeout),
        }
    }

    /// Write into `dir` instead of the configured picture folder.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.namer = FileNamer::new(dir, self.exporter.format());
        self
    }

    /// Stream name rules in use.
    pub fn markers(&self) -> &StreamMarkers {
        &self.markers
    }

    /// Capture every matching stream for `feature` and label the files with `status`.
    pub async fn acquire_and_save(
        &self,
        streams: &[Arc<Stream>],
        feature: &str,
        status: &str,
    ) -> AppResult<CaptureReport> {
        let prefix = FileNamer::timestamp_prefix(Local::now());
        tokio::fs::create_dir_all(self.namer.dir()).await?;

        let mut report = CaptureReport::default();
        let mut captured = Vec::new();
        for stream in streams.iter().filter(|s| self.markers.is_captured(s.name())) {
            let frame = self.snapshot(stream).await?;
            let path = self
                .namer
                .frame_path(&prefix, feature, stream.name(), status);
            self.export_frame(path.clone(), frame.frame.clone()).await?;
            info!(feature, stream = stream.name(), path = %path.display(), "image saved");

            report.streams.push(stream.name().to_string());
            report.files.push(path);
            captured.push(frame);
        }

        if captured.is_empty() {
            warn!(feature, "no stream to capture");
        } else {
            let path = self.namer.stack_path(&prefix, feature, status);
            self.export_stack(path.clone(), captured).await?;
            info!(feature, path = %path.display(), "combined image saved");
            report.combined = Some(path);
        }

        if let Some(reference) = streams.iter().find(|s| self.markers.is_reference(s.name())) {
            reference.set_single_frame_acquisition(false);
            reference.set_should_update(true);
        }
        Ok(report)
    }

    async fn snapshot(&self, stream: &Arc<Stream>) -> AppResult<StreamFrame> {
        stream.clear_raw();
        stream.set_single_frame_acquisition(true);
        stream.set_should_update(true);

        let watched = stream.clone();
        let outcome = poll_until(self.poll, None, || {
            let stream = watched.clone();
            async move { Ok(stream.has_frame()) }
        })
        .await?;
        stream.set_should_update(false);

        let timeout = self.poll.timeout.unwrap_or_default();
        let timed_out = || MillError::FrameTimeout {
            stream: stream.name().to_string(),
            timeout,
        };
        match outcome {
            PollOutcome::Satisfied => {
                let frame = stream.first_frame().ok_or_else(timed_out)?;
                debug!(stream = stream.name(), "frame received");
                Ok(StreamFrame {
                    stream: stream.name().to_string(),
                    frame,
                })
            }
            PollOutcome::TimedOut | PollOutcome::Cancelled => Err(timed_out()),
        }
    }

    async fn export_frame(&self, path: PathBuf, frame: mill_core::Frame) -> AppResult<()> {
        let exporter = self.exporter.clone();
        tokio::task::spawn_blocking(move || exporter.export_frame(&path, &frame)).await?
    }

    async fn export_stack(&self, path: PathBuf, frames: Vec<StreamFrame>) -> AppResult<()> {
        let exporter = self.exporter.clone();
        tokio::task::spawn_blocking(move || exporter.export_stack(&path, &frames)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportFormat;
    use crate::hardware::mock::MockCamera;
    use crate::stream::StreamKind;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sem(name: &str, camera: Arc<MockCamera>) -> Arc<Stream> {
        Stream::new(
            name,
            StreamKind::Sem {
                frame_time: Duration::from_millis(100),
            },
            camera,
        )
    }

    fn capture(dir: &std::path::Path, format: ExportFormat) -> ImageCapture {
        let config = AcquisitionConfig {
            format,
            frame_timeout: Some(Duration::from_secs(10)),
            ..AcquisitionConfig::default()
        };
        ImageCapture::from_config(&config).with_output_dir(dir)
    }

    #[tokio::test(start_paused = true)]
    async fn captures_matching_streams_only() {
        let dir = tempdir().unwrap();
        let camera = Arc::new(MockCamera::new(8, 8));
        let streams = vec![
            sem("Secondary electrons", camera.clone()),
            sem("RLM", camera.clone()),
            sem("Ex485Em525", camera.clone()),
            sem("Ex485Em525Acq", camera.clone()),
        ];

        let report = capture(dir.path(), ExportFormat::Tiff)
            .acquire_and_save(&streams, "Lamella-1", "PreMill")
            .await
            .unwrap();

        assert_eq!(report.streams, vec!["RLM", "Ex485Em525Acq"]);
        assert_eq!(report.files.len(), 2);
        for file in &report.files {
            assert!(file.exists());
        }
        let combined = report.combined.unwrap();
        let name = combined.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with(" Lamella-1 PreMill.tiff"), "{name}");

        // The reference stream is live again, the others are idle.
        assert!(streams[1].should_update());
        assert!(!streams[1].single_frame_acquisition());
        assert!(!streams[3].should_update());
        assert!(!streams[0].should_update());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_detector_times_out() {
        let dir = tempdir().unwrap();
        let camera = Arc::new(MockCamera::new(8, 8));
        camera.set_stalled(true);
        let streams = vec![sem("Ex390Em440Acq", camera)];

        let err = capture(dir.path(), ExportFormat::Png)
            .acquire_and_save(&streams, "Lamella-1", "ImgAcq")
            .await
            .unwrap_err();
        assert!(matches!(err, MillError::FrameTimeout { .. }));
        assert!(!streams[0].should_update());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_capture_writes_nothing() {
        let dir = tempdir().unwrap();
        let camera = Arc::new(MockCamera::new(8, 8));
        let streams = vec![sem("Secondary electrons", camera)];

        let report = capture(dir.path(), ExportFormat::Tiff)
            .acquire_and_save(&streams, "Lamella-1", "ImgAcq")
            .await
            .unwrap();
        assert_eq!(report, CaptureReport::default());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
