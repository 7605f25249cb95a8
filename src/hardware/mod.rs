//! Microscope components.
//!
//! [`Microscope`] is the registry plugins query for hardware. Components are
//! registered under a role (the name the host gives a component, e.g.
//! `"stage"` or `"SEM XT Connection"`) and looked up by role and capability.
//! A failed lookup is [`MillError::ComponentNotFound`], which the plugin host
//! reads as "this plugin cannot run here".

pub mod capabilities;
pub mod mock;

use crate::error::{AppResult, MillError};
use capabilities::{EmissionFilter, FrameSource, LightSource, Movable, ScanRotation};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Component roles used by the plugins.
pub mod roles {
    /// Sample stage
    pub const STAGE: &str = "stage";
    /// Objective focus
    pub const FOCUS: &str = "focus";
    /// FIB/SEM connection owning the scan rotation
    pub const SEM: &str = "SEM XT Connection";
    /// Optical camera
    pub const CCD: &str = "ccd";
    /// Excitation light
    pub const LIGHT: &str = "light";
    /// Emission filter wheel
    pub const FILTER: &str = "filter";
    /// Secondary electron detector
    pub const SE_DETECTOR: &str = "se-detector";
}

/// Components of one microscope, by role.
#[derive(Clone, Default)]
pub struct Microscope {
    name: String,
    movables: BTreeMap<String, Arc<dyn Movable>>,
    scan_rotations: BTreeMap<String, Arc<dyn ScanRotation>>,
    frame_sources: BTreeMap<String, Arc<dyn FrameSource>>,
    light_sources: BTreeMap<String, Arc<dyn LightSource>>,
    emission_filters: BTreeMap<String, Arc<dyn EmissionFilter>>,
}

impl fmt::Debug for Microscope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Microscope")
            .field("name", &self.name)
            .field("roles", &self.roles())
            .finish()
    }
}

fn lookup<T: ?Sized>(map: &BTreeMap<String, Arc<T>>, role: &str) -> AppResult<Arc<T>> {
    map.get(role)
        .cloned()
        .ok_or_else(|| MillError::ComponentNotFound(role.to_string()))
}

impl Microscope {
    /// Empty microscope.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Microscope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a positioner.
    pub fn with_movable(mut self, role: &str, component: Arc<dyn Movable>) -> Self {
        self.movables.insert(role.to_string(), component);
        self
    }

    /// Register a scan rotation.
    pub fn with_scan_rotation(mut self, role: &str, component: Arc<dyn ScanRotation>) -> Self {
        self.scan_rotations.insert(role.to_string(), component);
        self
    }

    /// Register a detector.
    pub fn with_frame_source(mut self, role: &str, component: Arc<dyn FrameSource>) -> Self {
        self.frame_sources.insert(role.to_string(), component);
        self
    }

    /// Register a light source.
    pub fn with_light_source(mut self, role: &str, component: Arc<dyn LightSource>) -> Self {
        self.light_sources.insert(role.to_string(), component);
        self
    }

    /// Register a filter wheel.
    pub fn with_emission_filter(mut self, role: &str, component: Arc<dyn EmissionFilter>) -> Self {
        self.emission_filters.insert(role.to_string(), component);
        self
    }

    /// Positioner registered under `role`.
    pub fn movable(&self, role: &str) -> AppResult<Arc<dyn Movable>> {
        lookup(&self.movables, role)
    }

    /// Scan rotation registered under `role`.
    pub fn scan_rotation(&self, role: &str) -> AppResult<Arc<dyn ScanRotation>> {
        lookup(&self.scan_rotations, role)
    }

    /// Detector registered under `role`.
    pub fn frame_source(&self, role: &str) -> AppResult<Arc<dyn FrameSource>> {
        lookup(&self.frame_sources, role)
    }

    /// Light source registered under `role`.
    pub fn light_source(&self, role: &str) -> AppResult<Arc<dyn LightSource>> {
        lookup(&self.light_sources, role)
    }

    /// Filter wheel registered under `role`.
    pub fn emission_filter(&self, role: &str) -> AppResult<Arc<dyn EmissionFilter>> {
        lookup(&self.emission_filters, role)
    }

    /// Every registered role, sorted, without duplicates.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self
            .movables
            .keys()
            .chain(self.scan_rotations.keys())
            .chain(self.frame_sources.keys())
            .chain(self.light_sources.keys())
            .chain(self.emission_filters.keys())
            .map(String::as_str)
            .collect();
        roles.sort_unstable();
        roles.dedup();
        roles
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockCamera, MockStage};
    use super::*;

    #[test]
    fn lookup_by_role_and_capability() {
        let microscope = Microscope::new("test")
            .with_movable(roles::STAGE, Arc::new(MockStage::sample_stage()))
            .with_frame_source(roles::CCD, Arc::new(MockCamera::new(8, 8)));

        assert!(microscope.movable(roles::STAGE).is_ok());
        assert!(microscope.frame_source(roles::CCD).is_ok());
        assert_eq!(microscope.roles(), vec!["ccd", "stage"]);
    }

    #[test]
    fn missing_component_names_the_role() {
        let microscope = Microscope::new("empty");
        match microscope.scan_rotation(roles::SEM) {
            Err(MillError::ComponentNotFound(role)) => assert_eq!(role, "SEM XT Connection"),
            other => panic!("unexpected lookup result: {:?}", other.map(|_| ())),
        }
        // A stage does not provide a scan rotation.
        let microscope = microscope.with_movable(roles::SEM, Arc::new(MockStage::focus()));
        assert!(microscope.scan_rotation(roles::SEM).is_err());
    }
}
