//! Settings dialogs and the operator interface.
//!
//! An [`AcquisitionDialog`] is a model: a title, an explanatory text, a set of
//! observable settings and a row of buttons. Presentation belongs to the host
//! through [`UserInterface`]. Buttons either close the dialog with a return
//! code or run an action while the dialog stays open (the stage dialog's
//! `Move`, `Z+` and `Z-`).
//!
//! [`ScriptedUi`] replays a fixed sequence of setting changes and button
//! presses; the binary feeds it from the command line and tests use it
//! directly.

use crate::error::{AppResult, MillError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use mill_core::observable::{AnySetting, Setting};
use mill_core::{ProgressFuture, SettingSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Return code of a dialog closed without pressing a closing button.
pub const DIALOG_CLOSED: i32 = 0;

/// Action run by a button that keeps the dialog open.
pub type ButtonCallback = Arc<dyn Fn() -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// What pressing a button does.
#[derive(Clone)]
pub enum ButtonAction {
    /// Close the dialog with this return code
    Close(i32),
    /// Run the callback, keep the dialog open
    Run(ButtonCallback),
}

impl fmt::Debug for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonAction::Close(code) => f.debug_tuple("Close").field(code).finish(),
            ButtonAction::Run(_) => f.write_str("Run(..)"),
        }
    }
}

/// A dialog button.
#[derive(Debug, Clone)]
pub struct DialogButton {
    /// Button text
    pub label: String,
    /// Effect of a press
    pub action: ButtonAction,
}

/// Result of one button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonOutcome {
    /// The dialog closed with this code
    Closed(i32),
    /// The button's action ran; the dialog is still open
    Ran,
}

/// A settings dialog.
#[derive(Debug)]
pub struct AcquisitionDialog {
    title: String,
    text: String,
    settings: SettingSet,
    buttons: Vec<DialogButton>,
}

impl AcquisitionDialog {
    /// Empty dialog.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            settings: SettingSet::new(),
            buttons: Vec::new(),
        }
    }

    /// Window title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Explanatory text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Add a setting, shown in insertion order.
    pub fn add_setting<P>(&mut self, setting: P)
    where
        P: AnySetting + 'static,
    {
        self.settings.register(setting);
    }

    /// Settings of the dialog.
    pub fn settings(&self) -> &SettingSet {
        &self.settings
    }

    /// Add a button closing the dialog with `code`.
    pub fn add_button(&mut self, label: impl Into<String>, code: i32) {
        self.buttons.push(DialogButton {
            label: label.into(),
            action: ButtonAction::Close(code),
        });
    }

    /// Add a button running `callback` without closing the dialog.
    pub fn add_action_button<F>(&mut self, label: impl Into<String>, callback: F)
    where
        F: Fn() -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static,
    {
        self.buttons.push(DialogButton {
            label: label.into(),
            action: ButtonAction::Run(Arc::new(callback)),
        });
    }

    /// Buttons in display order.
    pub fn buttons(&self) -> &[DialogButton] {
        &self.buttons
    }

    /// Change a setting from its JSON value, running its validators.
    pub fn set_setting(&self, name: &str, value: serde_json::Value) -> AppResult<()> {
        let setting: &dyn Setting = self
            .settings
            .get(name)
            .ok_or_else(|| MillError::Configuration(format!("dialog has no setting '{name}'")))?;
        setting.set_json(value)?;
        Ok(())
    }

    /// Press the button labelled `label`.
    pub async fn press(&self, label: &str) -> AppResult<ButtonOutcome> {
        let button = self
            .buttons
            .iter()
            .find(|b| b.label == label)
            .ok_or_else(|| {
                MillError::Configuration(format!(
                    "dialog '{}' has no button '{label}'",
                    self.title
                ))
            })?;
        match &button.action {
            ButtonAction::Close(code) => Ok(ButtonOutcome::Closed(*code)),
            ButtonAction::Run(callback) => {
                callback().await?;
                Ok(ButtonOutcome::Ran)
            }
        }
    }
}

/// File dialog filter, e.g. `*.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    /// Description shown next to the pattern
    pub description: String,
    /// Accepted extension, without the dot
    pub extension: String,
}

impl FileFilter {
    /// Filter on one extension.
    pub fn new(description: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            extension: extension.into(),
        }
    }

    /// Whether `path` passes the filter.
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension))
    }
}

/// The operator side of the plugins.
#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Show `dialog` until it closes; returns the closing code.
    async fn show_dialog(&self, dialog: &AcquisitionDialog) -> AppResult<i32>;

    /// Show a blocking message.
    fn show_message(&self, title: &str, message: &str);

    /// Ask for a file; `None` when the operator cancels.
    async fn choose_file(
        &self,
        title: &str,
        default_dir: &Path,
        filter: &FileFilter,
    ) -> AppResult<Option<PathBuf>>;

    /// Called when a long operation starts, so the operator can follow and
    /// cancel it.
    fn track_progress(&self, _title: &str, _progress: &ProgressFuture) {}
}

/// One step of a [`ScriptedUi`] session.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Set a dialog setting from JSON
    Set(String, serde_json::Value),
    /// Press a button
    Press(String),
}

/// [`UserInterface`] replaying a fixed script.
///
/// Each dialog consumes steps until a closing button is pressed. A dialog
/// that runs out of steps is closed with [`DIALOG_CLOSED`]. Messages are
/// logged and kept for inspection.
#[derive(Default)]
pub struct ScriptedUi {
    steps: Mutex<VecDeque<ScriptStep>>,
    file: Mutex<Option<PathBuf>>,
    messages: Mutex<Vec<(String, String)>>,
    cancel_on_track: bool,
    tracked: Mutex<Vec<ProgressFuture>>,
}

impl ScriptedUi {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a setting change.
    pub fn set(self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.steps.lock().push_back(ScriptStep::Set(name.into(), value));
        self
    }

    /// Append a button press.
    pub fn press(self, label: impl Into<String>) -> Self {
        self.steps.lock().push_back(ScriptStep::Press(label.into()));
        self
    }

    /// Answer file requests with `path`.
    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        *self.file.lock() = Some(path.into());
        self
    }

    /// Cancel every tracked operation as soon as it is handed over.
    pub fn cancelling(mut self) -> Self {
        self.cancel_on_track = true;
        self
    }

    /// Messages shown so far, as (title, text).
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    /// Operations handed to [`UserInterface::track_progress`].
    pub fn tracked(&self) -> Vec<ProgressFuture> {
        self.tracked.lock().clone()
    }

    fn next_step(&self) -> Option<ScriptStep> {
        self.steps.lock().pop_front()
    }
}

#[async_trait]
impl UserInterface for ScriptedUi {
    async fn show_dialog(&self, dialog: &AcquisitionDialog) -> AppResult<i32> {
        info!(title = dialog.title(), "dialog opened");
        while let Some(step) = self.next_step() {
            match step {
                ScriptStep::Set(name, value) => dialog.set_setting(&name, value)?,
                ScriptStep::Press(label) => {
                    info!(title = dialog.title(), button = %label, "button pressed");
                    if let ButtonOutcome::Closed(code) = dialog.press(&label).await? {
                        return Ok(code);
                    }
                }
            }
        }
        Ok(DIALOG_CLOSED)
    }

    fn show_message(&self, title: &str, message: &str) {
        warn!("{title}: {message}");
        self.messages
            .lock()
            .push((title.to_string(), message.to_string()));
    }

    async fn choose_file(
        &self,
        title: &str,
        default_dir: &Path,
        filter: &FileFilter,
    ) -> AppResult<Option<PathBuf>> {
        let file = self.file.lock().clone();
        match file {
            Some(path) if filter.accepts(&path) => Ok(Some(path)),
            Some(path) => Err(MillError::Configuration(format!(
                "{} is not a {} file",
                path.display(),
                filter.description
            ))),
            None => {
                info!(title, dir = %default_dir.display(), "file choice cancelled");
                Ok(None)
            }
        }
    }

    fn track_progress(&self, title: &str, progress: &ProgressFuture) {
        info!(title, "operation started");
        self.tracked.lock().push(progress.clone());
        if self.cancel_on_track {
            progress.cancel();
        }
    }
}
