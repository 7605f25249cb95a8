//! Plugins and the plugin host.
//!
//! Each plugin adds menu entries to the host and runs when one of them is
//! invoked. Plugins are built against a [`MainData`]; a plugin whose
//! hardware is missing refuses construction with
//! [`MillError::ComponentNotFound`] and the host leaves it out.
//!
//! # Architecture
//!
//! ```text
//! PluginHost
//! ├── AutoRoughMill     Milling/Auto mill...
//! ├── MillingShortcuts  Milling/Stop, Milling/Stress relieve cuts, ...
//! ├── MoveStage         Cryo/Move stage...
//! ├── LoadFeatures      Cryo/Load features..., Cryo/Remove all features...
//! └── StreamSetup       Cryo/Set-up streams
//! ```

pub mod auto_rough_mill;
pub mod load_features;
pub mod milling_shortcuts;
pub mod move_stage;
pub mod stream_setup;

use crate::app::MainData;
use crate::dialog::UserInterface;
use crate::error::{AppResult, MillError};
use crate::guard::{GuardedOperation, TabGuard};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

pub use auto_rough_mill::AutoRoughMill;
pub use load_features::LoadFeatures;
pub use milling_shortcuts::MillingShortcuts;
pub use move_stage::MoveStage;
pub use stream_setup::StreamSetup;

/// Descriptive information about a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    /// Display name
    pub name: &'static str,
    /// Version
    pub version: &'static str,
    /// One-line description
    pub description: &'static str,
}

/// Keyboard shortcut: `Ctrl+<key>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shortcut {
    /// Key pressed together with Ctrl
    pub key: char,
}

impl FromStr for Shortcut {
    type Err = MillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .strip_prefix("Ctrl+")
            .ok_or_else(|| MillError::InvalidMenu(s.to_string()))?;
        let mut chars = key.chars();
        match (chars.next(), chars.next()) {
            (Some(key), None) => Ok(Self { key }),
            _ => Err(MillError::InvalidMenu(s.to_string())),
        }
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ctrl+{}", self.key)
    }
}

/// A menu entry: `"Group/Item"` plus an optional shortcut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    /// Menu path
    pub path: String,
    /// Keyboard shortcut
    pub shortcut: Option<Shortcut>,
}

impl MenuEntry {
    /// Entry without shortcut.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            shortcut: None,
        }
    }

    /// Parse `"Group/Item"` or `"Group/Item\tCtrl+K"`.
    pub fn parse(definition: &str) -> AppResult<Self> {
        let (path, shortcut) = match definition.split_once('\t') {
            Some((path, shortcut)) => (path, Some(shortcut.parse()?)),
            None => (definition, None),
        };
        match path.split_once('/') {
            Some((group, item)) if !group.is_empty() && !item.is_empty() => Ok(Self {
                path: path.to_string(),
                shortcut,
            }),
            _ => Err(MillError::InvalidMenu(definition.to_string())),
        }
    }
}

impl fmt::Display for MenuEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shortcut {
            Some(shortcut) => write!(f, "{}\t{}", self.path, shortcut),
            None => f.write_str(&self.path),
        }
    }
}

/// A host plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Descriptive information.
    fn info(&self) -> PluginInfo;

    /// Menu entries this plugin handles.
    fn menus(&self) -> Vec<MenuEntry>;

    /// Run the entry at `menu`.
    async fn invoke(&self, menu: &str, ui: &dyn UserInterface) -> AppResult<()>;
}

/// Builds a plugin against the shared context.
pub type PluginFactory = fn(&MainData) -> AppResult<Arc<dyn Plugin>>;

fn auto_rough_mill(main: &MainData) -> AppResult<Arc<dyn Plugin>> {
    Ok(Arc::new(AutoRoughMill::new(main)?))
}

fn milling_shortcuts(main: &MainData) -> AppResult<Arc<dyn Plugin>> {
    Ok(Arc::new(MillingShortcuts::new(main)?))
}

fn move_stage(main: &MainData) -> AppResult<Arc<dyn Plugin>> {
    Ok(Arc::new(MoveStage::new(main)?))
}

fn load_features(main: &MainData) -> AppResult<Arc<dyn Plugin>> {
    Ok(Arc::new(LoadFeatures::new(main)))
}

fn stream_setup(main: &MainData) -> AppResult<Arc<dyn Plugin>> {
    Ok(Arc::new(StreamSetup::new(main)?))
}

/// Every plugin shipped with the crate, in menu order.
pub fn builtin_plugins() -> Vec<(&'static str, PluginFactory)> {
    vec![
        (AutoRoughMill::NAME, auto_rough_mill as PluginFactory),
        (MillingShortcuts::NAME, milling_shortcuts),
        (MoveStage::NAME, move_stage),
        (LoadFeatures::NAME, load_features),
        (StreamSetup::NAME, stream_setup),
    ]
}

/// Loaded plugins and their menu entries.
pub struct PluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
    menus: Vec<(MenuEntry, usize)>,
}

impl fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.plugin_names())
            .field("menus", &self.menu_entries())
            .finish()
    }
}

impl PluginHost {
    /// Load the built-in plugins.
    pub fn load(main: &MainData) -> AppResult<Self> {
        Self::load_with(main, builtin_plugins())
    }

    /// Load `factories`, skipping plugins whose hardware is missing.
    pub fn load_with(
        main: &MainData,
        factories: Vec<(&'static str, PluginFactory)>,
    ) -> AppResult<Self> {
        let mut host = Self {
            plugins: Vec::new(),
            menus: Vec::new(),
        };
        for (name, factory) in factories {
            match factory(main) {
                Ok(plugin) => host.register(plugin)?,
                Err(MillError::ComponentNotFound(role)) => {
                    debug!(plugin = name, role = %role, "missing component");
                    info!("Hardware not found, cannot use the {name} plugin.");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(host)
    }

    /// Add a plugin and its menu entries.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> AppResult<()> {
        let entries = plugin.menus();
        if let Some(taken) = entries
            .iter()
            .find(|entry| self.menus.iter().any(|(e, _)| e.path == entry.path))
        {
            return Err(MillError::InvalidMenu(format!(
                "{} registered twice",
                taken.path
            )));
        }
        let index = self.plugins.len();
        for entry in entries {
            debug!(plugin = plugin.info().name, menu = %entry, "menu registered");
            self.menus.push((entry, index));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Names of the loaded plugins.
    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.info().name).collect()
    }

    /// Registered menu entries, in registration order.
    pub fn menu_entries(&self) -> Vec<MenuEntry> {
        self.menus.iter().map(|(entry, _)| entry.clone()).collect()
    }

    /// Menu entry bound to `shortcut`.
    pub fn find_shortcut(&self, shortcut: Shortcut) -> Option<&MenuEntry> {
        self.menus
            .iter()
            .map(|(entry, _)| entry)
            .find(|entry| entry.shortcut == Some(shortcut))
    }

    /// Run the plugin owning `menu`.
    pub async fn invoke(&self, menu: &str, ui: &dyn UserInterface) -> AppResult<()> {
        let index = self
            .menus
            .iter()
            .find(|(entry, _)| entry.path == menu)
            .map(|(_, index)| *index)
            .ok_or_else(|| MillError::UnknownMenu(menu.to_string()))?;
        let plugin = &self.plugins[index];
        info!(plugin = plugin.info().name, menu, "menu invoked");
        plugin.invoke(menu, ui).await
    }
}

/// Run the tab guard for `operation`, telling the operator on rejection.
///
/// Returns `false` when the operation must not run.
pub(crate) fn check_tab(
    main: &MainData,
    ui: &dyn UserInterface,
    operation: GuardedOperation,
) -> bool {
    let guard = TabGuard::from_config(&main.config.tabs);
    match guard.check(operation, &main.current_tab(), &main.available_tabs) {
        Ok(()) => true,
        Err(rejection) => {
            ui.show_message(&rejection.title, &rejection.message);
            false
        }
    }
}
