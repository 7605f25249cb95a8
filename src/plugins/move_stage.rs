//! Move the sample stage.
//!
//! A dialog with the five stage coordinates, defaulting to the position just
//! below the cryogenic chamber shield, and a z step. `Move` drives the axes
//! one at a time in the order x, y, rx, rz, z; `Z+` and `Z-` step z by dz.

use super::{MenuEntry, Plugin, PluginInfo};
use crate::app::MainData;
use crate::config::StagePose;
use crate::dialog::{AcquisitionDialog, UserInterface};
use crate::error::AppResult;
use crate::hardware::capabilities::{axis_moves, Axis, Movable};
use crate::hardware::roles;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use mill_core::Observable;
use std::sync::Arc;
use tracing::info;

/// Menu entry of the plugin.
pub const MENU: &str = "Cryo/Move stage...";

/// Order in which `Move` drives the axes.
pub const MOVE_ORDER: [Axis; 5] = [Axis::X, Axis::Y, Axis::Rx, Axis::Rz, Axis::Z];

/// Target settings shown in the dialog.
#[derive(Debug, Clone)]
struct StageTarget {
    x: Observable<f64>,
    y: Observable<f64>,
    z: Observable<f64>,
    rx_deg: Observable<f64>,
    rz_deg: Observable<f64>,
    dz: Observable<f64>,
}

impl StageTarget {
    fn new(stage: &dyn Movable, pose: StagePose, dz: f64, dz_range: (f64, f64)) -> Self {
        let linear = |name: &str, value: f64, axis: Axis| {
            let setting = Observable::new(name, value).with_units("m");
            match stage.axis_range(axis) {
                Some((low, high)) => setting.with_range(low, high),
                None => setting,
            }
        };
        let angular = |name: &str, value: f64, axis: Axis| {
            let setting = Observable::new(name, value.to_degrees()).with_units("deg");
            match stage.axis_range(axis) {
                Some((low, high)) => setting.with_range(low.to_degrees(), high.to_degrees()),
                None => setting,
            }
        };
        Self {
            rx_deg: angular("rx", pose.rx, Axis::Rx),
            rz_deg: angular("rz", pose.rz, Axis::Rz),
            x: linear("x", pose.x, Axis::X),
            y: linear("y", pose.y, Axis::Y),
            z: linear("z", pose.z, Axis::Z),
            dz: Observable::new("dz", dz)
                .with_units("m")
                .with_range(dz_range.0, dz_range.1),
        }
    }

    /// Target of `axis` in stage units.
    fn value(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x.get(),
            Axis::Y => self.y.get(),
            Axis::Z => self.z.get(),
            Axis::Rx => self.rx_deg.get().to_radians(),
            Axis::Rz => self.rz_deg.get().to_radians(),
        }
    }
}

/// Moves the sample stage to a typed-in position.
pub struct MoveStage {
    stage: Arc<dyn Movable>,
    target: StageTarget,
}

impl MoveStage {
    /// Plugin name.
    pub const NAME: &'static str = "Move stage";

    /// Needs the sample stage.
    pub fn new(main: &MainData) -> AppResult<Self> {
        let stage = main.microscope.movable(roles::STAGE)?;
        let config = &main.config.stage;
        let target = StageTarget::new(
            stage.as_ref(),
            config.shield_position,
            config.dz_default,
            config.dz_range,
        );
        Ok(Self { stage, target })
    }

    fn dialog(&self) -> AcquisitionDialog {
        let mut dialog = AcquisitionDialog::new(
            "Move sample stage",
            "Move order: x, y, Rx, Rz, z\nDefault position: chamber shield\nMove stage to position:",
        );
        dialog.add_setting(self.target.rx_deg.clone());
        dialog.add_setting(self.target.rz_deg.clone());
        dialog.add_setting(self.target.x.clone());
        dialog.add_setting(self.target.y.clone());
        dialog.add_setting(self.target.z.clone());
        dialog.add_setting(self.target.dz.clone());

        dialog.add_button("Done", 0);
        let (stage, target) = (self.stage.clone(), self.target.clone());
        dialog.add_action_button("Move", move || {
            move_to_target(stage.clone(), target.clone())
        });
        let (stage, dz) = (self.stage.clone(), self.target.dz.clone());
        dialog.add_action_button("Z+", move || step_z(stage.clone(), dz.get()));
        let (stage, dz) = (self.stage.clone(), self.target.dz.clone());
        dialog.add_action_button("Z-", move || step_z(stage.clone(), -dz.get()));
        dialog
    }
}

/// Drive the axes one by one on a worker task.
fn move_to_target(
    stage: Arc<dyn Movable>,
    target: StageTarget,
) -> BoxFuture<'static, AppResult<()>> {
    async move {
        let worker = tokio::spawn(async move {
            for axis in MOVE_ORDER {
                let position = target.value(axis);
                info!(%axis, position, "moving stage axis");
                stage.move_abs(axis_moves([(axis, position)])).await?;
            }
            info!("stage move done");
            AppResult::Ok(())
        });
        worker.await?
    }
    .boxed()
}

fn step_z(stage: Arc<dyn Movable>, dz: f64) -> BoxFuture<'static, AppResult<()>> {
    async move {
        info!(dz, "stepping stage z");
        stage.move_rel(axis_moves([(Axis::Z, dz)])).await?;
        Ok(())
    }
    .boxed()
}

#[async_trait]
impl Plugin for MoveStage {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: Self::NAME,
            version: env!("CARGO_PKG_VERSION"),
            description: "Moves the sample stage to a typed-in position",
        }
    }

    fn menus(&self) -> Vec<MenuEntry> {
        vec![MenuEntry::new(MENU)]
    }

    async fn invoke(&self, _menu: &str, ui: &dyn UserInterface) -> AppResult<()> {
        let dialog = self.dialog();
        let code = ui.show_dialog(&dialog).await?;
        info!(code, "stage dialog closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MillConfig;

    #[tokio::test]
    async fn dialog_states_move_order_and_default() {
        let (main, _devices) = MainData::simulated(MillConfig::default()).unwrap();
        let dialog = MoveStage::new(&main).unwrap().dialog();

        assert_eq!(dialog.title(), "Move sample stage");
        assert!(dialog.text().starts_with("Move order: x, y, Rx, Rz, z\n"));
        assert!(dialog.text().contains("Default position: chamber shield"));
        assert_eq!(dialog.settings().names(), vec!["rx", "rz", "x", "y", "z", "dz"]);
    }
}
