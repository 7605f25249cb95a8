//! Load and clear the feature list.

use super::{check_tab, MenuEntry, Plugin, PluginInfo};
use crate::app::MainData;
use crate::dialog::{FileFilter, UserInterface};
use crate::error::{AppResult, MillError};
use crate::guard::GuardedOperation;
use async_trait::async_trait;
use mill_core::feature::read_features;
use std::path::{Path, PathBuf};
use tracing::info;

/// Menu entry loading a feature file.
pub const LOAD_MENU: &str = "Cryo/Load features...";
/// Menu entry clearing the feature list.
pub const REMOVE_MENU: &str = "Cryo/Remove all features...";

/// Replaces the shared feature list from disk, or empties it.
pub struct LoadFeatures {
    main: MainData,
}

impl LoadFeatures {
    /// Plugin name.
    pub const NAME: &'static str = "Load features";

    /// No hardware needed.
    pub fn new(main: &MainData) -> Self {
        Self { main: main.clone() }
    }

    async fn load(&self, ui: &dyn UserInterface) -> AppResult<()> {
        if !check_tab(&self.main, ui, GuardedOperation::LoadFeatures) {
            return Ok(());
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let filter = FileFilter::new("JSON files", "json");
        let Some(path) = ui.choose_file("Load features", &home, &filter).await? else {
            return Ok(());
        };

        let dir = feature_dir(&path).await?;
        let features = tokio::task::spawn_blocking(move || read_features(&dir)).await??;
        info!(count = features.len(), file = %path.display(), "features loaded");
        self.main.features.update(|list| *list = features);
        Ok(())
    }

    fn remove_all(&self, ui: &dyn UserInterface) {
        if !check_tab(&self.main, ui, GuardedOperation::RemoveFeatures) {
            return;
        }
        info!(count = self.main.features.get().len(), "removing all features");
        self.main.features.update(Vec::clear);
    }
}

/// Directory holding the chosen file, symlinks resolved.
async fn feature_dir(path: &Path) -> AppResult<PathBuf> {
    let canonical = tokio::fs::canonicalize(path).await?;
    canonical
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| MillError::Configuration(format!("{} has no parent", canonical.display())))
}

#[async_trait]
impl Plugin for LoadFeatures {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: Self::NAME,
            version: env!("CARGO_PKG_VERSION"),
            description: "Loads or clears the feature list",
        }
    }

    fn menus(&self) -> Vec<MenuEntry> {
        vec![MenuEntry::new(LOAD_MENU), MenuEntry::new(REMOVE_MENU)]
    }

    async fn invoke(&self, menu: &str, ui: &dyn UserInterface) -> AppResult<()> {
        match menu {
            LOAD_MENU => self.load(ui).await,
            REMOVE_MENU => {
                self.remove_all(ui);
                Ok(())
            }
            other => Err(MillError::UnknownMenu(other.to_string())),
        }
    }
}
