//! Acquisition streams.
//!
//! A [`Stream`] is a named channel bound to a detector. Plugins drive it
//! through two flags and read its frame buffer:
//!
//! - `should_update`: the stream is acquiring
//! - `single_frame_acquisition`: stop after one frame instead of running live
//!
//! Each stream with a detector owns a background task reacting to
//! `should_update`. In single-frame mode it stores exactly one frame, then
//! clears `should_update`; in live mode it keeps replacing the buffer with the
//! latest frame until `should_update` is cleared.

use crate::config::AcquisitionConfig;
use crate::error::{AppResult, MillError};
use crate::hardware::capabilities::{
    Band, EmissionFilter, FrameRequest, FrameSource, LightSource, Spectrum,
};
use mill_core::{Frame, Observable};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Back-off after a failed acquisition.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Optical settings of a fluorescence stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FluoSettings {
    /// Excitation spectrum
    pub excitation: Spectrum,
    /// Emission band
    pub emission: Band,
    /// Light power (W)
    pub power: f64,
    /// Exposure time
    pub exposure: Duration,
    /// Binning (horizontal, vertical)
    pub binning: (u32, u32),
    /// Display tint (RGB)
    pub tint: [u8; 3],
}

impl FluoSettings {
    /// Settings selecting spectrum `excitation` of `light` and band `emission` of `filter`.
    ///
    /// Fails when either index is past the end of what the hardware offers.
    pub fn from_indices(
        light: &dyn LightSource,
        filter: &dyn EmissionFilter,
        excitation: usize,
        emission: usize,
    ) -> AppResult<Self> {
        let spectra = light.spectra();
        let excitation = *spectra.get(excitation).ok_or_else(|| {
            MillError::Configuration(format!(
                "excitation index {excitation} out of range, light offers {} spectra",
                spectra.len()
            ))
        })?;
        let bands = filter.bands();
        let emission = *bands.get(emission).ok_or_else(|| {
            MillError::Configuration(format!(
                "emission index {emission} out of range, filter offers {} bands",
                bands.len()
            ))
        })?;
        Ok(Self {
            excitation,
            emission,
            power: 0.0,
            exposure: Duration::from_millis(100),
            binning: (1, 1),
            tint: [255, 255, 255],
        })
    }
}

/// What a stream shows.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamKind {
    /// Optical stream through the light source and filter wheel
    Fluorescence(FluoSettings),
    /// Electron beam image
    Sem {
        /// Dwell-limited frame time
        frame_time: Duration,
    },
    /// Previously acquired data, never updated
    Static,
}

impl StreamKind {
    /// Whether this is an optical stream.
    pub fn is_fluorescence(&self) -> bool {
        matches!(self, StreamKind::Fluorescence(_))
    }

    fn frame_request(&self) -> FrameRequest {
        match self {
            StreamKind::Fluorescence(settings) => FrameRequest {
                exposure: settings.exposure,
                binning: settings.binning,
            },
            StreamKind::Sem { frame_time } => FrameRequest {
                exposure: *frame_time,
                binning: (1, 1),
            },
            StreamKind::Static => FrameRequest::default(),
        }
    }
}

/// A named acquisition channel.
pub struct Stream {
    name: String,
    kind: StreamKind,
    single_frame_acquisition: Observable<bool>,
    should_update: Observable<bool>,
    raw: Arc<Mutex<Vec<Frame>>>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("single_frame_acquisition", &self.single_frame_acquisition.get())
            .field("should_update", &self.should_update.get())
            .field("frames", &self.raw.lock().len())
            .finish()
    }
}

impl Stream {
    /// Create a stream acquiring from `source`.
    ///
    /// Spawns the acquisition task, so this must run inside a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        kind: StreamKind,
        source: Arc<dyn FrameSource>,
    ) -> Arc<Self> {
        let mut stream = Self::unbound(name.into(), kind);
        stream.worker = Some(tokio::spawn(acquisition_loop(
            stream.name.clone(),
            stream.kind.frame_request(),
            source,
            stream.single_frame_acquisition.clone(),
            stream.should_update.clone(),
            stream.raw.clone(),
        )));
        Arc::new(stream)
    }

    /// A stream holding `frames`, without a detector.
    pub fn with_static_data(name: impl Into<String>, frames: Vec<Frame>) -> Arc<Self> {
        let stream = Self::unbound(name.into(), StreamKind::Static);
        *stream.raw.lock() = frames;
        Arc::new(stream)
    }

    fn unbound(name: String, kind: StreamKind) -> Self {
        Self {
            single_frame_acquisition: Observable::new(
                format!("{name}.single_frame_acquisition"),
                false,
            ),
            should_update: Observable::new(format!("{name}.should_update"), false),
            name,
            kind,
            raw: Arc::new(Mutex::new(Vec::new())),
            worker: None,
        }
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream kind.
    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }

    /// Whether the stream is acquiring.
    pub fn should_update(&self) -> bool {
        self.should_update.get()
    }

    /// Start or stop acquisition.
    pub fn set_should_update(&self, value: bool) {
        self.should_update.update(|v| *v = value);
    }

    /// Whether acquisition stops after one frame.
    pub fn single_frame_acquisition(&self) -> bool {
        self.single_frame_acquisition.get()
    }

    /// Switch between single-frame and live acquisition.
    pub fn set_single_frame_acquisition(&self, value: bool) {
        self.single_frame_acquisition.update(|v| *v = value);
    }

    /// Frames currently buffered.
    pub fn raw(&self) -> Vec<Frame> {
        self.raw.lock().clone()
    }

    /// First buffered frame.
    pub fn first_frame(&self) -> Option<Frame> {
        self.raw.lock().first().cloned()
    }

    /// Whether the buffer holds at least one frame.
    pub fn has_frame(&self) -> bool {
        !self.raw.lock().is_empty()
    }

    /// Drop buffered frames.
    pub fn clear_raw(&self) {
        self.raw.lock().clear();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn acquisition_loop(
    name: String,
    request: FrameRequest,
    source: Arc<dyn FrameSource>,
    single_frame: Observable<bool>,
    should_update: Observable<bool>,
    raw: Arc<Mutex<Vec<Frame>>>,
) {
    let mut updates = should_update.subscribe();
    loop {
        let open = updates.wait_for(|active| *active).await.is_ok();
        if !open {
            return;
        }
        match source.acquire_frame(request).await {
            Ok(frame) => {
                *raw.lock() = vec![frame];
                if single_frame.get() {
                    debug!(stream = %name, "single frame acquired");
                    should_update.update(|v| *v = false);
                }
            }
            Err(e) => {
                warn!(stream = %name, "acquisition failed: {e:#}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Name rules deciding which streams are captured and which are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMarkers {
    /// Substring marking streams to capture
    pub acquisition: String,
    /// Exact name of the reference stream, captured too
    pub reference: String,
    /// Substring marking streams never touched
    pub excluded: String,
}

impl StreamMarkers {
    /// Markers from the acquisition configuration.
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            acquisition: config.acquisition_marker.clone(),
            reference: config.reference_stream.clone(),
            excluded: config.excluded_marker.clone(),
        }
    }

    /// Whether cleanup and capture leave `name` alone.
    pub fn is_excluded(&self, name: &str) -> bool {
        name.contains(&self.excluded)
    }

    /// Whether `name` is captured for every feature.
    pub fn is_captured(&self, name: &str) -> bool {
        !self.is_excluded(name) && (name.contains(&self.acquisition) || name == self.reference)
    }

    /// Whether `name` is the reference stream.
    pub fn is_reference(&self, name: &str) -> bool {
        name == self.reference
    }
}

impl Default for StreamMarkers {
    fn default() -> Self {
        Self::from_config(&AcquisitionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::{EmissionFilter, LightSource};
    use crate::hardware::mock::{MockCamera, MockFilter, MockLight};
    use tokio::time::sleep;

    fn sem_stream(camera: Arc<MockCamera>) -> Arc<Stream> {
        Stream::new(
            "Secondary electrons",
            StreamKind::Sem {
                frame_time: Duration::from_millis(200),
            },
            camera,
        )
    }

    #[test]
    fn markers_match_acquisition_and_reference_streams() {
        let markers = StreamMarkers::default();
        assert!(markers.is_captured("Ex485Em525Acq"));
        assert!(markers.is_captured("RLM"));
        assert!(markers.is_captured("RLMAcq"));
        assert!(!markers.is_captured("Ex485Em525"));
        assert!(!markers.is_captured("RLM 2"));
        assert!(!markers.is_captured("Secondary electronsAcq"));
        assert!(markers.is_excluded("Secondary electrons"));
    }

    #[tokio::test(start_paused = true)]
    async fn single_frame_mode_stops_after_one_frame() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let stream = sem_stream(camera.clone());

        stream.set_single_frame_acquisition(true);
        stream.set_should_update(true);
        sleep(Duration::from_secs(1)).await;

        assert!(!stream.should_update());
        assert_eq!(stream.raw().len(), 1);
        assert_eq!(camera.frame_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_mode_keeps_the_latest_frame() {
        let camera = Arc::new(MockCamera::new(16, 16));
        let stream = sem_stream(camera.clone());

        stream.set_should_update(true);
        sleep(Duration::from_secs(2)).await;
        stream.set_should_update(false);
        sleep(Duration::from_secs(1)).await;

        let acquired = camera.frame_count();
        assert!(acquired > 1);
        assert_eq!(stream.raw().len(), 1);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(camera.frame_count(), acquired);
    }

    #[test]
    fn fluo_settings_index_into_the_optical_path() {
        let settings = FluoSettings::from_indices(&MockLight, &MockFilter, 1, 2).unwrap();
        assert_eq!(settings.excitation.peak, 485e-9);
        assert_eq!(settings.emission, MockFilter.bands()[2]);

        let err = FluoSettings::from_indices(&MockLight, &MockFilter, 4, 0).unwrap_err();
        assert!(matches!(err, MillError::Configuration(_)));
    }

    #[test]
    fn static_streams_keep_their_data() {
        let frame = Frame::zeros(4, 4).unwrap();
        let stream = Stream::with_static_data("Overview", vec![frame]);
        assert!(stream.has_frame());
        assert!(!stream.kind().is_fluorescence());
    }
}
