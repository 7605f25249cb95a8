//! Shared application context.
//!
//! [`MainData`] holds everything the plugins share: the microscope, the UI
//! tab state, the feature list and the stream list. It is cheap to clone;
//! clones observe and mutate the same values.

use crate::config::MillConfig;
use crate::error::AppResult;
use crate::hardware::mock::{simulated_microscope, SimulatedDevices};
use crate::hardware::{roles, Microscope};
use crate::stream::{FluoSettings, Stream, StreamKind};
use mill_core::feature::feature_list;
use mill_core::{FeatureList, Observable};
use std::sync::Arc;
use std::time::Duration;

/// Tab shown when the simulated host starts.
pub const DEFAULT_TAB: &str = "cryosecom-localization";

/// Tabs of the simulated host.
pub const SIMULATED_TABS: [&str; 3] = [
    "cryosecom-localization",
    "cryosecom_chamber",
    "cryosecom-align",
];

/// Simulated milling job duration.
const SIMULATED_JOB: Duration = Duration::from_secs(30);

/// The shared state plugins operate on.
#[derive(Debug, Clone)]
pub struct MainData {
    /// Hardware components
    pub microscope: Arc<Microscope>,
    /// Name of the active tab
    pub tab: Observable<String>,
    /// Names of every tab of the host
    pub available_tabs: Vec<String>,
    /// Shared feature list
    pub features: FeatureList,
    /// Streams of the acquisition view
    pub streams: Observable<Vec<Arc<Stream>>>,
    /// Loaded configuration
    pub config: Arc<MillConfig>,
}

impl MainData {
    /// Context for `microscope`, with no features and no streams.
    pub fn new(
        microscope: Microscope,
        tab: impl Into<String>,
        available_tabs: Vec<String>,
        config: MillConfig,
    ) -> Self {
        Self {
            microscope: Arc::new(microscope),
            tab: Observable::new("tab", tab.into()),
            available_tabs,
            features: feature_list(),
            streams: Observable::new("streams", Vec::new()),
            config: Arc::new(config),
        }
    }

    /// A simulated cryo FIB/LM with its default streams.
    ///
    /// Streams are bound to their detectors, so this must run inside a tokio
    /// runtime.
    pub fn simulated(config: MillConfig) -> AppResult<(Self, SimulatedDevices)> {
        let baseline = config.beam.baseline_rotation_deg.to_radians();
        let (microscope, devices) = simulated_microscope(baseline, SIMULATED_JOB);
        let tabs = SIMULATED_TABS.iter().map(|t| t.to_string()).collect();
        let main = Self::new(microscope, DEFAULT_TAB, tabs, config);

        let ccd = main.microscope.frame_source(roles::CCD)?;
        let light = main.microscope.light_source(roles::LIGHT)?;
        let filter = main.microscope.emission_filter(roles::FILTER)?;
        let se_detector = main.microscope.frame_source(roles::SE_DETECTOR)?;

        let rlm = FluoSettings {
            power: 0.01,
            exposure: Duration::from_millis(150),
            ..FluoSettings::from_indices(&*light, &*filter, 1, 0)?
        };
        let fluo = FluoSettings {
            power: 0.01,
            exposure: Duration::from_millis(500),
            binning: (2, 2),
            tint: [55, 255, 0],
            ..FluoSettings::from_indices(&*light, &*filter, 1, 2)?
        };
        main.add_stream(Stream::new(
            "Secondary electrons",
            StreamKind::Sem {
                frame_time: Duration::from_secs(1),
            },
            se_detector,
        ));
        main.add_stream(Stream::new("RLM", StreamKind::Fluorescence(rlm), ccd.clone()));
        main.add_stream(Stream::new(
            "Filtered colour 1",
            StreamKind::Fluorescence(fluo),
            ccd,
        ));
        Ok((main, devices))
    }

    /// Current tab name.
    pub fn current_tab(&self) -> String {
        self.tab.get()
    }

    /// Switch tab.
    pub fn set_tab(&self, tab: impl Into<String>) {
        let tab = tab.into();
        self.tab.update(|t| *t = tab);
    }

    /// Snapshot of the stream list.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.get()
    }

    /// Append a stream.
    pub fn add_stream(&self, stream: Arc<Stream>) {
        self.streams.update(|streams| streams.push(stream));
    }

    /// Stream named `name`.
    pub fn stream(&self, name: &str) -> Option<Arc<Stream>> {
        self.streams.get().into_iter().find(|s| s.name() == name)
    }
}
