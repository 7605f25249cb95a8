//! Milling shortcuts.
//!
//! Each entry writes a scan rotation a small offset away from the baseline.
//! The instrument-side milling script reads the offset and starts (or stops)
//! the matching job.

use super::{MenuEntry, Plugin, PluginInfo};
use crate::app::MainData;
use crate::dialog::UserInterface;
use crate::error::{AppResult, MillError};
use crate::hardware::capabilities::ScanRotation;
use crate::hardware::roles;
use crate::sequencer::rotation_target;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Menu definitions and their rotation offsets (degrees).
pub const SHORTCUTS: [(&str, f64); 8] = [
    ("Milling/Stop\tCtrl+`", -0.001),
    ("Milling/Stress relieve cuts\tCtrl+1", 0.001),
    ("Milling/2.5 um\tCtrl+2", 0.002),
    ("Milling/1.0 um\tCtrl+3", 0.003),
    ("Milling/0.6 um\tCtrl+4", 0.004),
    ("Milling/0.2 um\tCtrl+5", 0.005),
    ("Milling/3-beam alignment hole\tCtrl+6", 0.006),
    ("Milling/Mill RC & RM", 0.011),
];

/// Triggers milling jobs from the menu.
pub struct MillingShortcuts {
    scan_rotation: Arc<dyn ScanRotation>,
    baseline_deg: f64,
    entries: Vec<(MenuEntry, f64)>,
}

impl MillingShortcuts {
    /// Plugin name.
    pub const NAME: &'static str = "Milling shortcuts";

    /// Needs the FIB/SEM connection.
    pub fn new(main: &MainData) -> AppResult<Self> {
        let scan_rotation = main.microscope.scan_rotation(roles::SEM)?;
        let entries = SHORTCUTS
            .iter()
            .map(|(definition, offset)| -> AppResult<(MenuEntry, f64)> {
                Ok((MenuEntry::parse(definition)?, *offset))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self {
            scan_rotation,
            baseline_deg: main.config.beam.baseline_rotation_deg,
            entries,
        })
    }

    /// Offset (degrees) of the entry at `menu`.
    pub fn offset(&self, menu: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(entry, _)| entry.path == menu)
            .map(|(_, offset)| *offset)
    }
}

#[async_trait]
impl Plugin for MillingShortcuts {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: Self::NAME,
            version: env!("CARGO_PKG_VERSION"),
            description: "Starts milling jobs through the scan rotation",
        }
    }

    fn menus(&self) -> Vec<MenuEntry> {
        self.entries.iter().map(|(entry, _)| entry.clone()).collect()
    }

    async fn invoke(&self, menu: &str, _ui: &dyn UserInterface) -> AppResult<()> {
        let offset = self
            .offset(menu)
            .ok_or_else(|| MillError::UnknownMenu(menu.to_string()))?;
        let rotation = rotation_target(self.baseline_deg, offset);
        info!(menu, offset, rotation, "setting scan rotation");
        self.scan_rotation.set_rotation(rotation).await?;
        Ok(())
    }
}
