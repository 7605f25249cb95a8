//! Tab guard.
//!
//! Operations that drive the stage or touch the feature list only run from
//! an acquisition/localization tab. A rejection carries the message to show
//! the operator; nothing else happens.

use crate::config::TabConfig;
use thiserror::Error;
use tracing::info;

/// Operations gated on the active tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedOperation {
    /// Automated rough milling
    AutoMilling,
    /// Adding the preset acquisition streams
    StreamSetup,
    /// Loading a feature file
    LoadFeatures,
    /// Clearing the feature list
    RemoveFeatures,
}

impl GuardedOperation {
    /// Message naming the tab the operation must be started from.
    pub fn message(self, tab_label: &str) -> String {
        match self {
            GuardedOperation::AutoMilling => {
                format!("Automated rough milling must be started from the {tab_label} tab.")
            }
            GuardedOperation::StreamSetup => {
                format!("Streams must be set up from the {tab_label} tab.")
            }
            GuardedOperation::LoadFeatures => {
                format!("Loading features must be done from the {tab_label} tab.")
            }
            GuardedOperation::RemoveFeatures => {
                format!("Removing features must be done from the {tab_label} tab.")
            }
        }
    }

    /// Title of the rejection message box.
    pub fn title(self) -> &'static str {
        match self {
            GuardedOperation::AutoMilling => "Automated rough milling not possible",
            GuardedOperation::StreamSetup => "Setting up streams not possible",
            GuardedOperation::LoadFeatures => "Loading features not possible",
            GuardedOperation::RemoveFeatures => "Removing features not possible",
        }
    }
}

/// An operation was invoked from the wrong tab.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GuardRejection {
    /// Message box title
    pub title: String,
    /// Message box text
    pub message: String,
    /// Tab the operation was invoked from
    pub current_tab: String,
}

/// Checks the active tab against the allowed ones.
#[derive(Debug, Clone)]
pub struct TabGuard {
    allowed: Vec<String>,
    localization_tab: String,
}

impl TabGuard {
    /// Guard allowing `allowed`.
    pub fn new(allowed: Vec<String>, localization_tab: impl Into<String>) -> Self {
        Self {
            allowed,
            localization_tab: localization_tab.into(),
        }
    }

    /// Guard from the tab configuration.
    pub fn from_config(config: &TabConfig) -> Self {
        Self::new(config.allowed.clone(), config.localization_tab.clone())
    }

    /// Whether `tab` may run guarded operations.
    pub fn allows(&self, tab: &str) -> bool {
        self.allowed.iter().any(|t| t == tab)
    }

    /// How the required tab is called in messages for a host with `available_tabs`.
    pub fn expected_tab_label(&self, available_tabs: &[String]) -> &'static str {
        if available_tabs.iter().any(|t| *t == self.localization_tab) {
            "localization"
        } else {
            "acquisition"
        }
    }

    /// Accept or reject `operation` invoked from `current_tab`.
    pub fn check(
        &self,
        operation: GuardedOperation,
        current_tab: &str,
        available_tabs: &[String],
    ) -> Result<(), GuardRejection> {
        if self.allows(current_tab) {
            return Ok(());
        }
        info!(?operation, tab = current_tab, "operation refused from this tab");
        Err(GuardRejection {
            title: operation.title().to_string(),
            message: operation.message(self.expected_tab_label(available_tabs)),
            current_tab: current_tab.to_string(),
        })
    }
}

impl Default for TabGuard {
    fn default() -> Self {
        Self::from_config(&TabConfig::default())
    }
}
