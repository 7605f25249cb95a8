//! Automated rough milling.
//!
//! Asks for a milling action, then either mills every active feature with it
//! or only images every feature. See [`Sequencer`] for the per-feature steps.

use super::{check_tab, MenuEntry, Plugin, PluginInfo};
use crate::app::MainData;
use crate::dialog::{AcquisitionDialog, UserInterface};
use crate::error::{AppResult, MillError};
use crate::guard::GuardedOperation;
use crate::sequencer::{MillAction, MillingContext, SequenceOutcome, SequenceReport, Sequencer};
use async_trait::async_trait;
use mill_core::{Observable, ProgressFuture};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Menu entry of the plugin.
pub const MENU: &str = "Milling/Auto mill...";

/// Dialog code of "Cancel" and of a closed window.
pub const CODE_CANCEL: i32 = 0;
/// Dialog code of "Run action".
pub const CODE_RUN_ACTION: i32 = 1;
/// Dialog code of "Acq imgs".
pub const CODE_ACQUIRE_IMAGES: i32 = 2;

const DIALOG_TEXT: &str = "LM stream names must contain 'Acq' to automatically acquire images.\n\
ACTIVE Feature states are processed";

/// Mills or images every feature of the feature list.
pub struct AutoRoughMill {
    main: MainData,
    sequencer: Sequencer,
    action: Observable<usize>,
    last_report: Mutex<Option<SequenceReport>>,
}

impl AutoRoughMill {
    /// Plugin name.
    pub const NAME: &'static str = "Automated rough milling";

    /// Needs the stage, the focus and the FIB/SEM connection.
    pub fn new(main: &MainData) -> AppResult<Self> {
        let ctx = MillingContext::from_main(main)?;
        let action = Observable::new("act", MillAction::ReliefCuts.index())
            .with_label("Per feature action")
            .with_choices(
                MillAction::ALL
                    .iter()
                    .map(|a| (a.index(), a.label()))
                    .collect(),
            );
        Ok(Self {
            main: main.clone(),
            sequencer: Sequencer::new(ctx),
            action,
            last_report: Mutex::new(None),
        })
    }

    /// Report of the last sequence run.
    pub fn last_report(&self) -> Option<SequenceReport> {
        self.last_report.lock().clone()
    }

    fn dialog(&self) -> AcquisitionDialog {
        let mut dialog = AcquisitionDialog::new("Automated rough milling", DIALOG_TEXT);
        dialog.add_setting(self.action.clone());
        dialog.add_button("Cancel", CODE_CANCEL);
        dialog.add_button("Run action", CODE_RUN_ACTION);
        dialog.add_button("Acq imgs", CODE_ACQUIRE_IMAGES);
        dialog
    }

    async fn run(&self, code: i32, ui: &dyn UserInterface) -> AppResult<SequenceOutcome> {
        let features = self.main.features.get();
        let progress = ProgressFuture::new();
        let report = match code {
            CODE_RUN_ACTION => {
                let index = self.action.get();
                let action = MillAction::from_index(index).ok_or_else(|| {
                    MillError::Configuration(format!("no milling action with index {index}"))
                })?;
                ui.track_progress("Automated rough milling", &progress);
                self.sequencer.run_action(&features, action, &progress).await?
            }
            _ => {
                ui.track_progress("Image acquisition", &progress);
                self.sequencer.acquire_images(&features, &progress).await?
            }
        };
        let outcome = report.outcome;
        if outcome == SequenceOutcome::Cancelled {
            info!(processed = ?report.processed, "sequence cancelled by the operator");
        }
        *self.last_report.lock() = Some(report);
        Ok(outcome)
    }
}

#[async_trait]
impl Plugin for AutoRoughMill {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: Self::NAME,
            version: env!("CARGO_PKG_VERSION"),
            description: "Mills or images every feature in turn",
        }
    }

    fn menus(&self) -> Vec<MenuEntry> {
        vec![MenuEntry::new(MENU)]
    }

    async fn invoke(&self, _menu: &str, ui: &dyn UserInterface) -> AppResult<()> {
        if !check_tab(&self.main, ui, GuardedOperation::AutoMilling) {
            return Ok(());
        }

        let dialog = self.dialog();
        let code = ui.show_dialog(&dialog).await?;
        match code {
            CODE_CANCEL => info!("Automated milling cancelled"),
            CODE_RUN_ACTION => {
                if self.run(code, ui).await? == SequenceOutcome::Completed {
                    info!("Milling completed");
                }
            }
            CODE_ACQUIRE_IMAGES => {
                if self.run(code, ui).await? == SequenceOutcome::Completed {
                    info!("Image acquisition completed");
                }
            }
            other => warn!("Got unknown return code {other}"),
        }
        Ok(())
    }
}
