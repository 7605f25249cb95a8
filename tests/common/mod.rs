//! Shared setup for the integration tests.

#![allow(dead_code)]

use cryo_mill::config::MillConfig;
use cryo_mill::hardware::mock::SimulatedDevices;
use cryo_mill::{Feature, FeatureStatus, MainData, PluginHost, StagePosition};
use std::path::Path;
use tempfile::TempDir;

/// A simulated host with its plugins loaded and exports going to a
/// temporary directory.
pub struct Harness {
    pub main: MainData,
    pub devices: SimulatedDevices,
    pub host: PluginHost,
    pub pictures: TempDir,
}

impl Harness {
    pub fn pictures(&self) -> &Path {
        self.pictures.path()
    }

    /// Files written to the picture directory, sorted by name.
    pub fn exported_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.pictures())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn stream_flags(&self) -> Vec<(String, bool, bool)> {
        self.main
            .streams()
            .iter()
            .map(|s| {
                (
                    s.name().to_string(),
                    s.should_update(),
                    s.single_frame_acquisition(),
                )
            })
            .collect()
    }
}

/// Must be called from inside a tokio runtime.
pub fn harness() -> Harness {
    harness_with(MillConfig::default())
}

pub fn harness_with(mut config: MillConfig) -> Harness {
    let pictures = tempfile::tempdir().unwrap();
    config.acquisition.picture_dir = Some(pictures.path().to_path_buf());
    let (main, devices) = MainData::simulated(config).unwrap();
    let host = PluginHost::load(&main).unwrap();
    Harness {
        main,
        devices,
        host,
        pictures,
    }
}

/// `statuses.len()` features a millimetre apart along x.
pub fn features(statuses: &[FeatureStatus]) -> Vec<Feature> {
    statuses
        .iter()
        .enumerate()
        .map(|(i, status)| {
            Feature::new(
                format!("Feature-{}", i + 1),
                StagePosition::new(i as f64 * 1e-3, -2e-3, 1e-4),
                *status,
            )
        })
        .collect()
}
