//! Configuration using Figment.
//!
//! Configuration is layered:
//! 1. built-in defaults (`MillConfig::default()`)
//! 2. a TOML file (`cryo_mill.toml` in the working directory, or an explicit path)
//! 3. environment variables prefixed with `CRYOMILL_`, `__` separating sections
//!
//! ```text
//! CRYOMILL_APPLICATION__LOG_LEVEL=debug
//! CRYOMILL_ACQUISITION__FORMAT=png
//! CRYOMILL_SEQUENCE__ROTATION_TIMEOUT="2h"
//! ```
//!
//! Durations use humantime notation ("2s", "5m", "1h 30m").

use crate::error::{AppResult, MillError};
use crate::export::ExportFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cryo_mill.toml";
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CRYOMILL_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MillConfig {
    /// Logging and naming
    pub application: ApplicationConfig,
    /// Image capture and export
    pub acquisition: AcquisitionConfig,
    /// Per-feature sequence timing
    pub sequence: SequenceConfig,
    /// Ion/electron beam settings
    pub beam: BeamConfig,
    /// Tabs from which guarded operations may run
    pub tabs: TabConfig,
    /// Sample stage presets
    pub stage: StageConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "cryo_mill".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Image capture and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// File format of exported images
    pub format: ExportFormat,
    /// Output directory; the user's picture folder when unset
    pub picture_dir: Option<PathBuf>,
    /// Streams whose name contains this are captured
    pub acquisition_marker: String,
    /// Stream captured in addition to marked ones and put back live afterwards
    pub reference_stream: String,
    /// Streams whose name contains this are never touched
    pub excluded_marker: String,
    /// Delay between two checks of a stream's frame buffer
    #[serde(with = "humantime_serde")]
    pub frame_poll_interval: Duration,
    /// Give up waiting for a frame after this long
    #[serde(with = "humantime_serde")]
    pub frame_timeout: Option<Duration>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::Tiff,
            picture_dir: None,
            acquisition_marker: "Acq".to_string(),
            reference_stream: "RLM".to_string(),
            excluded_marker: "electrons".to_string(),
            frame_poll_interval: Duration::from_secs(1),
            frame_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl AcquisitionConfig {
    /// Directory exports are written to.
    pub fn picture_dir(&self) -> PathBuf {
        self.picture_dir
            .clone()
            .or_else(dirs::picture_dir)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Per-feature sequence timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Pause after moving to a feature and after the pre-milling capture
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
    /// Pause after changing the scan rotation
    #[serde(with = "humantime_serde")]
    pub rotation_settle: Duration,
    /// Delay between two reads of the scan rotation while milling
    #[serde(with = "humantime_serde")]
    pub rotation_poll_interval: Duration,
    /// Give up waiting for the milling job after this long
    #[serde(with = "humantime_serde")]
    pub rotation_timeout: Option<Duration>,
    /// Rotation counts as restored within this many radians of the baseline
    pub rotation_tolerance_rad: f64,
    /// Per-feature time estimate used before any feature completed
    #[serde(with = "humantime_serde")]
    pub default_site_estimate: Duration,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(2),
            rotation_settle: Duration::from_secs(2),
            rotation_poll_interval: Duration::from_secs(4),
            rotation_timeout: Some(Duration::from_secs(4 * 3600)),
            rotation_tolerance_rad: 1e-4,
            default_site_estimate: Duration::from_secs(5 * 60),
        }
    }
}

/// Beam settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// Scan rotation the milling offsets are added to, in degrees
    pub baseline_rotation_deg: f64,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            baseline_rotation_deg: 180.0,
        }
    }
}

/// Tabs from which guarded operations may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabConfig {
    /// Allowed tab names
    pub allowed: Vec<String>,
    /// Tab whose presence makes messages ask for "localization"
    pub localization_tab: String,
}

impl Default for TabConfig {
    fn default() -> Self {
        Self {
            allowed: vec![
                "secom_live".to_string(),
                "sparc_acqui".to_string(),
                "cryosecom-localization".to_string(),
            ],
            localization_tab: "cryosecom-localization".to_string(),
        }
    }
}

/// A full stage pose; rotations in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePose {
    /// x (m)
    pub x: f64,
    /// y (m)
    pub y: f64,
    /// z (m)
    pub z: f64,
    /// rx (rad)
    pub rx: f64,
    /// rz (rad)
    pub rz: f64,
}

/// Sample stage presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Default target: just below the cryogenic chamber shield
    pub shield_position: StagePose,
    /// Default z step (m)
    pub dz_default: f64,
    /// Allowed z step range (m)
    pub dz_range: (f64, f64),
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            shield_position: StagePose {
                x: -0.005468263998000001,
                y: -0.00867527761136524,
                z: 0.001056795793872422,
                rx: -0.027931323924749046,
                rz: 5.1140346198211525e-05,
            },
            dz_default: 50e-6,
            dz_range: (10e-6, 200e-6),
        }
    }
}

impl MillConfig {
    /// Load defaults, the TOML file and environment overrides.
    ///
    /// Without an explicit `path`, `cryo_mill.toml` is read when present.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// The provider stack used by [`MillConfig::load`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(MillConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate from any figment.
    pub fn from_figment(figment: Figment) -> AppResult<Self> {
        let config: MillConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the sequences cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.acquisition.frame_poll_interval.is_zero() {
            return Err(MillError::Configuration(
                "acquisition.frame_poll_interval must be greater than zero".into(),
            ));
        }
        if self.sequence.rotation_poll_interval.is_zero() {
            return Err(MillError::Configuration(
                "sequence.rotation_poll_interval must be greater than zero".into(),
            ));
        }
        if !(self.sequence.rotation_tolerance_rad > 0.0) {
            return Err(MillError::Configuration(format!(
                "sequence.rotation_tolerance_rad must be positive, got {}",
                self.sequence.rotation_tolerance_rad
            )));
        }
        if self.tabs.allowed.is_empty() {
            return Err(MillError::Configuration(
                "tabs.allowed must name at least one tab".into(),
            ));
        }
        let (low, high) = self.stage.dz_range;
        if !(low > 0.0 && low <= self.stage.dz_default && self.stage.dz_default <= high) {
            return Err(MillError::Configuration(format!(
                "stage.dz_default {} outside stage.dz_range [{}, {}]",
                self.stage.dz_default, low, high
            )));
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MillError::Configuration(format!("cannot render configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(MillConfig::default()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = MillConfig::from_figment(defaults()).unwrap();
        assert_eq!(config, MillConfig::default());
        assert_eq!(config.sequence.rotation_poll_interval, Duration::from_secs(4));
        assert_eq!(config.beam.baseline_rotation_deg, 180.0);
    }

    #[test]
    fn toml_overrides_single_fields() {
        let figment = defaults().merge(Toml::string(
            r#"
            [acquisition]
            format = "png"
            frame_timeout = "30s"

            [sequence]
            dwell = "500ms"
            "#,
        ));
        let config = MillConfig::from_figment(figment).unwrap();

        assert_eq!(config.acquisition.format, ExportFormat::Png);
        assert_eq!(config.acquisition.frame_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.sequence.dwell, Duration::from_millis(500));
        assert_eq!(config.sequence.rotation_settle, Duration::from_secs(2));
        assert_eq!(config.acquisition.reference_stream, "RLM");
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let figment = defaults().merge(Toml::string("[sequence]\nrotation_tolerance_rad = 0.0\n"));
        assert!(matches!(
            MillConfig::from_figment(figment),
            Err(MillError::Configuration(_))
        ));

        let figment = defaults().merge(Toml::string("[tabs]\nallowed = []\n"));
        assert!(MillConfig::from_figment(figment).is_err());
    }

    #[test]
    fn bad_types_surface_as_config_errors() {
        let figment = defaults().merge(Toml::string("[sequence]\ndwell = 12\n"));
        assert!(matches!(
            MillConfig::from_figment(figment),
            Err(MillError::Config(_))
        ));
    }

    #[test]
    fn renders_as_toml() {
        let text = MillConfig::default().to_toml().unwrap();
        assert!(text.contains("[sequence]"));
        assert!(text.contains("rotation_poll_interval = \"4s\""));
    }
}
