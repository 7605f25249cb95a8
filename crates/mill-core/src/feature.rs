//! Features: named stage positions with a processing status.
//!
//! Features are created by the feature-management UI and persisted in a
//! `features.json` file inside a project directory:
//!
//! ```json
//! {"feature_list": [{"name": "Feature-1", "pos": [0.001, -0.002, 0.0003], "status": "Active"}]}
//! ```
//!
//! The status of a feature is an [`Observable`], so every clone of a
//! [`Feature`] (for instance the copy held by the shared feature list and the
//! one being processed by the sequencer) sees the same status.

use crate::error::{CoreError, CoreResult};
use crate::limits::MAX_FEATURE_FILE_BYTES;
use crate::observable::Observable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// File name of the feature store inside a project directory.
pub const FEATURES_FILENAME: &str = "features.json";

/// Processing status of a feature.
///
/// Statuses move forward only: `Active → RoughMilled → Polished`.
/// `Deactive` (shown as "Discarded") can be reached from any other status and
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureStatus {
    /// Waiting to be processed
    #[serde(rename = "Active")]
    Active,
    /// Rough milling done
    #[serde(rename = "Rough Milled")]
    RoughMilled,
    /// Polishing done
    #[serde(rename = "Polished")]
    Polished,
    /// Excluded from processing
    #[serde(rename = "Discarded")]
    Deactive,
}

impl FeatureStatus {
    /// Label used in the feature file.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStatus::Active => "Active",
            FeatureStatus::RoughMilled => "Rough Milled",
            FeatureStatus::Polished => "Polished",
            FeatureStatus::Deactive => "Discarded",
        }
    }

    fn rank(self) -> Option<u8> {
        match self {
            FeatureStatus::Active => Some(0),
            FeatureStatus::RoughMilled => Some(1),
            FeatureStatus::Polished => Some(2),
            FeatureStatus::Deactive => None,
        }
    }

    /// Whether moving from `self` to `next` goes forward along the lattice.
    pub fn can_advance_to(self, next: FeatureStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => target > current,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(FeatureStatus::Active),
            "Rough Milled" => Ok(FeatureStatus::RoughMilled),
            "Polished" => Ok(FeatureStatus::Polished),
            "Discarded" => Ok(FeatureStatus::Deactive),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Stage coordinates of a feature, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    /// Stage x
    pub x: f64,
    /// Stage y
    pub y: f64,
    /// Focus z
    pub z: f64,
}

impl StagePosition {
    /// Build a position from its three coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<[f64; 3]> for StagePosition {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<StagePosition> for [f64; 3] {
    fn from(p: StagePosition) -> Self {
        [p.x, p.y, p.z]
    }
}

/// A named stage position with a shared, observable status.
#[derive(Debug, Clone)]
pub struct Feature {
    name: String,
    position: StagePosition,
    status: Observable<FeatureStatus>,
}

impl Feature {
    /// Create a feature.
    pub fn new(name: impl Into<String>, position: StagePosition, status: FeatureStatus) -> Self {
        let name = name.into();
        Self {
            status: Observable::new(format!("{name}.status"), status),
            name,
            position,
        }
    }

    /// Feature name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored position.
    pub fn position(&self) -> StagePosition {
        self.position
    }

    /// Current status.
    pub fn status(&self) -> FeatureStatus {
        self.status.get()
    }

    /// The observable behind the status, for subscribers.
    pub fn status_observable(&self) -> &Observable<FeatureStatus> {
        &self.status
    }

    /// Move the status forward to `next`.
    ///
    /// Returns `true` when the status changed. Backward or lateral moves are
    /// refused and logged; they are not errors.
    pub fn advance_status(&self, next: FeatureStatus) -> bool {
        let current = self.status.get();
        if !current.can_advance_to(next) {
            warn!(
                feature = %self.name,
                "refusing status change {} -> {}",
                current,
                next
            );
            return false;
        }
        self.status.update(|s| *s = next);
        true
    }
}

/// The shared list of features.
pub type FeatureList = Observable<Vec<Feature>>;

/// Create an empty shared feature list.
pub fn feature_list() -> FeatureList {
    Observable::new("features", Vec::new())
}

#[derive(Serialize, Deserialize)]
struct FeatureRecord {
    name: String,
    pos: [f64; 3],
    status: FeatureStatus,
}

#[derive(Serialize, Deserialize)]
struct FeatureFile {
    feature_list: Vec<FeatureRecord>,
}

/// Path of the feature store inside `dir`.
pub fn features_path(dir: &Path) -> PathBuf {
    dir.join(FEATURES_FILENAME)
}

/// Read every feature stored in `dir/features.json`.
pub fn read_features(dir: &Path) -> CoreResult<Vec<Feature>> {
    let path = features_path(dir);
    let io_err = |source| CoreError::FeatureIo {
        path: path.clone(),
        source,
    };

    let bytes = std::fs::metadata(&path).map_err(io_err)?.len();
    if bytes > MAX_FEATURE_FILE_BYTES {
        return Err(CoreError::FeatureFileTooLarge {
            path: path.clone(),
            bytes,
            max_bytes: MAX_FEATURE_FILE_BYTES,
        });
    }

    let text = std::fs::read_to_string(&path).map_err(io_err)?;
    let file: FeatureFile =
        serde_json::from_str(&text).map_err(|source| CoreError::FeatureParse {
            path: path.clone(),
            source,
        })?;

    debug!("Read {} features from {}", file.feature_list.len(), path.display());
    Ok(file
        .feature_list
        .into_iter()
        .map(|r| Feature::new(r.name, r.pos.into(), r.status))
        .collect())
}

/// Write `features` to `dir/features.json`, replacing any previous content.
pub fn save_features(dir: &Path, features: &[Feature]) -> CoreResult<()> {
    let path = features_path(dir);
    let file = FeatureFile {
        feature_list: features
            .iter()
            .map(|f| FeatureRecord {
                name: f.name().to_string(),
                pos: f.position().into(),
                status: f.status(),
            })
            .collect(),
    };
    let text = serde_json::to_string_pretty(&file).map_err(|source| CoreError::FeatureParse {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, text).map_err(|source| CoreError::FeatureIo { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn status_lattice_only_moves_forward() {
        use FeatureStatus::*;
        assert!(Active.can_advance_to(RoughMilled));
        assert!(RoughMilled.can_advance_to(Polished));
        assert!(Active.can_advance_to(Deactive));
        assert!(!RoughMilled.can_advance_to(Active));
        assert!(!Polished.can_advance_to(RoughMilled));
        assert!(!RoughMilled.can_advance_to(RoughMilled));
        assert!(!Deactive.can_advance_to(Active));
    }

    #[test]
    fn advance_status_is_shared_between_clones() {
        let feature = Feature::new("Lamella-1", StagePosition::new(0.0, 0.0, 0.0), FeatureStatus::Active);
        let in_list = feature.clone();

        assert!(feature.advance_status(FeatureStatus::RoughMilled));
        assert_eq!(in_list.status(), FeatureStatus::RoughMilled);

        assert!(!feature.advance_status(FeatureStatus::Active));
        assert_eq!(in_list.status(), FeatureStatus::RoughMilled);
    }

    #[test]
    fn reads_feature_file_layout() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(FEATURES_FILENAME),
            r#"{"feature_list": [
                {"name": "F1", "pos": [0.001, -0.002, 0.0003], "status": "Active"},
                {"name": "F2", "pos": [0.0, 0.0, 0.0], "status": "Discarded"},
                {"name": "F3", "pos": [1e-4, 2e-4, 3e-4], "status": "Rough Milled"}
            ]}"#,
        )
        .unwrap();

        let features = read_features(dir.path()).unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].name(), "F1");
        assert_eq!(features[0].position(), StagePosition::new(0.001, -0.002, 0.0003));
        assert_eq!(features[1].status(), FeatureStatus::Deactive);
        assert_eq!(features[2].status(), FeatureStatus::RoughMilled);
    }

    #[test]
    fn save_then_read_preserves_status() {
        let dir = tempdir().unwrap();
        let feature = Feature::new("F1", StagePosition::new(1e-3, 2e-3, 3e-4), FeatureStatus::Active);
        feature.advance_status(FeatureStatus::Polished);

        save_features(dir.path(), &[feature]).unwrap();
        let text = std::fs::read_to_string(features_path(dir.path())).unwrap();
        assert!(text.contains("\"Polished\""));

        let loaded = read_features(dir.path()).unwrap();
        assert_eq!(loaded[0].status(), FeatureStatus::Polished);
    }

    #[test]
    fn missing_and_malformed_files_are_errors() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_features(dir.path()),
            Err(CoreError::FeatureIo { .. })
        ));

        std::fs::write(features_path(dir.path()), "{\"feature_list\": [{\"name\": 1}]}").unwrap();
        assert!(matches!(
            read_features(dir.path()),
            Err(CoreError::FeatureParse { .. })
        ));
    }

    #[test]
    fn status_parses_file_labels() {
        assert_eq!("Rough Milled".parse::<FeatureStatus>().unwrap(), FeatureStatus::RoughMilled);
        assert!("Milled".parse::<FeatureStatus>().is_err());
    }
}
