//! Preset acquisition streams.
//!
//! Adds the live and acquisition fluorescence streams used by the milling
//! workflow. Excitation and emission are indices into the light source
//! spectra and the filter wheel bands.

use super::{check_tab, MenuEntry, Plugin, PluginInfo};
use crate::app::MainData;
use crate::dialog::UserInterface;
use crate::error::AppResult;
use crate::guard::GuardedOperation;
use crate::hardware::capabilities::{EmissionFilter, FrameSource, LightSource};
use crate::hardware::roles;
use crate::stream::{FluoSettings, Stream, StreamKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Menu entry of the plugin.
pub const MENU: &str = "Cryo/Set-up streams";

/// Light power of every preset (W).
pub const PRESET_POWER: f64 = 0.01;

/// One preset stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamPreset {
    /// Stream name
    pub name: &'static str,
    /// Light source spectrum index
    pub excitation: usize,
    /// Filter band index
    pub emission: usize,
    /// Exposure time (s)
    pub exposure_s: f64,
    /// Display tint
    pub tint: [u8; 3],
    /// Binning (both directions)
    pub binning: u32,
}

const fn preset(
    name: &'static str,
    excitation: usize,
    emission: usize,
    exposure_s: f64,
    tint: [u8; 3],
    binning: u32,
) -> StreamPreset {
    StreamPreset {
        name,
        excitation,
        emission,
        exposure_s,
        tint,
        binning,
    }
}

/// Streams added, in order.
pub const PRESETS: [StreamPreset; 9] = [
    preset("RLMAcq", 1, 0, 0.15, [255, 255, 255], 1),
    preset("Ex390Em440", 0, 1, 0.5, [0, 0, 255], 2),
    preset("Ex485Em525", 1, 2, 0.5, [55, 255, 0], 2),
    preset("Ex560Em607", 2, 3, 0.5, [255, 149, 0], 2),
    preset("Ex648Em684", 3, 4, 0.5, [255, 0, 0], 2),
    preset("Ex390Em440Acq", 0, 1, 20.0, [0, 0, 255], 1),
    preset("Ex485Em525Acq", 1, 2, 20.0, [55, 255, 0], 1),
    preset("Ex560Em607Acq", 2, 3, 20.0, [255, 149, 0], 1),
    preset("Ex648Em684Acq", 3, 4, 20.0, [255, 0, 0], 1),
];

/// Adds the preset streams next to the existing optical ones.
pub struct StreamSetup {
    main: MainData,
    ccd: Arc<dyn FrameSource>,
    light: Arc<dyn LightSource>,
    filter: Arc<dyn EmissionFilter>,
}

impl StreamSetup {
    /// Plugin name.
    pub const NAME: &'static str = "Stream setup";

    /// Needs the optical camera, the light source and the emission filter.
    pub fn new(main: &MainData) -> AppResult<Self> {
        Ok(Self {
            main: main.clone(),
            ccd: main.microscope.frame_source(roles::CCD)?,
            light: main.microscope.light_source(roles::LIGHT)?,
            filter: main.microscope.emission_filter(roles::FILTER)?,
        })
    }

    fn settings(&self) -> AppResult<Vec<(StreamPreset, FluoSettings)>> {
        PRESETS
            .iter()
            .map(|p| -> AppResult<(StreamPreset, FluoSettings)> {
                let settings = FluoSettings {
                    power: PRESET_POWER,
                    exposure: Duration::from_secs_f64(p.exposure_s),
                    binning: (p.binning, p.binning),
                    tint: p.tint,
                    ..FluoSettings::from_indices(
                        self.light.as_ref(),
                        self.filter.as_ref(),
                        p.excitation,
                        p.emission,
                    )?
                };
                Ok((*p, settings))
            })
            .collect()
    }
}

#[async_trait]
impl Plugin for StreamSetup {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: Self::NAME,
            version: env!("CARGO_PKG_VERSION"),
            description: "Adds the preset acquisition streams",
        }
    }

    fn menus(&self) -> Vec<MenuEntry> {
        vec![MenuEntry::new(MENU)]
    }

    async fn invoke(&self, _menu: &str, ui: &dyn UserInterface) -> AppResult<()> {
        if !check_tab(&self.main, ui, GuardedOperation::StreamSetup) {
            return Ok(());
        }
        if !self.main.streams().iter().any(|s| s.kind().is_fluorescence()) {
            ui.show_message(
                GuardedOperation::StreamSetup.title(),
                "At least one optical stream needs to be present",
            );
            return Ok(());
        }

        for (preset, settings) in self.settings()? {
            if self.main.stream(preset.name).is_some() {
                info!(stream = preset.name, "stream already present");
                continue;
            }
            let stream = Stream::new(
                preset.name,
                StreamKind::Fluorescence(settings),
                self.ccd.clone(),
            );
            self.main.add_stream(stream);
            info!(stream = preset.name, "stream added");
        }
        Ok(())
    }
}
