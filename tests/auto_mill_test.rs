mod common;

use common::{features, harness};
use cryo_mill::dialog::{ScriptedUi, UserInterface};
use cryo_mill::plugins::auto_rough_mill::{AutoRoughMill, MENU};
use cryo_mill::plugins::Plugin;
use cryo_mill::sequencer::{rotation_target, MillAction, SequenceOutcome};
use cryo_mill::FeatureStatus::{Active, Deactive, RoughMilled};
use mill_core::progress::TaskState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn statuses(main: &cryo_mill::MainData) -> Vec<cryo_mill::FeatureStatus> {
    main.features.get().iter().map(|f| f.status()).collect()
}

#[tokio::test(start_paused = true)]
async fn refused_outside_the_localization_tab() {
    let h = harness();
    h.main.features.set(features(&[Active, Active])).unwrap();
    h.main.set_tab("cryosecom_chamber");

    let ui = ScriptedUi::new().set("act", json!(1)).press("Run action");
    h.host.invoke(MENU, &ui).await.unwrap();

    assert_eq!(
        ui.messages(),
        vec![(
            "Automated rough milling not possible".to_string(),
            "Automated rough milling must be started from the localization tab.".to_string()
        )]
    );
    assert!(h.devices.stage.history().is_empty());
    assert!(h.devices.scan_rotation.writes().is_empty());
    assert_eq!(statuses(&h.main), vec![Active, Active]);
    assert!(h.exported_files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rough_milling_processes_active_features_once() {
    let h = harness();
    h.main
        .features
        .set(features(&[Active, Deactive, Active, RoughMilled]))
        .unwrap();
    let plugin = AutoRoughMill::new(&h.main).unwrap();

    let ui = ScriptedUi::new().set("act", json!(1)).press("Run action");
    plugin.invoke(MENU, &ui).await.unwrap();

    let report = plugin.last_report().unwrap();
    assert_eq!(report.outcome, SequenceOutcome::Completed);
    assert_eq!(report.processed, vec!["Feature-1", "Feature-3"]);
    assert_eq!(
        statuses(&h.main),
        vec![RoughMilled, Deactive, RoughMilled, RoughMilled]
    );

    let target = rotation_target(180.0, MillAction::RoughMilling.offset_deg());
    assert_eq!(h.devices.scan_rotation.writes(), vec![target, target]);

    // Pre-milling and post-milling capture of the reference stream, each with
    // its combined file.
    assert_eq!(report.captures.len(), 4);
    let files = h.exported_files();
    assert_eq!(files.len(), 8);
    assert_eq!(files.iter().filter(|f| f.contains("PreMill")).count(), 4);
    assert_eq!(files.iter().filter(|f| f.contains("Rough Milling")).count(), 4);
    assert!(!files.iter().any(|f| f.contains("Feature-2") || f.contains("Feature-4")));

    let tracked = ui.tracked();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].state(), TaskState::Finished);
    assert!(h.stream_flags().iter().all(|(_, live, single)| !live && !single));
}

#[tokio::test(start_paused = true)]
async fn relief_cuts_leave_statuses_alone() {
    let h = harness();
    h.main.features.set(features(&[Active])).unwrap();
    let plugin = AutoRoughMill::new(&h.main).unwrap();

    let ui = ScriptedUi::new().set("act", json!(0)).press("Run action");
    plugin.invoke(MENU, &ui).await.unwrap();

    assert_eq!(plugin.last_report().unwrap().processed, vec!["Feature-1"]);
    assert_eq!(statuses(&h.main), vec![Active]);
    assert!(h
        .exported_files()
        .iter()
        .any(|f| f.ends_with("Feature-1 Relief Cuts.tiff")));
}

#[tokio::test(start_paused = true)]
async fn run_action_defaults_to_relief_cuts() {
    let h = harness();
    h.main.features.set(features(&[Active, Active])).unwrap();

    let ui = ScriptedUi::new().press("Run action");
    h.host.invoke(MENU, &ui).await.unwrap();

    let target = rotation_target(180.0, MillAction::ReliefCuts.offset_deg());
    assert_eq!(h.devices.scan_rotation.writes(), vec![target, target]);
    assert_eq!(statuses(&h.main), vec![Active, Active]);
}

#[tokio::test(start_paused = true)]
async fn image_acquisition_skips_discarded_features() {
    let h = harness();
    h.main
        .features
        .set(features(&[RoughMilled, Deactive, Active]))
        .unwrap();
    let plugin = AutoRoughMill::new(&h.main).unwrap();

    let ui = ScriptedUi::new().press("Acq imgs");
    plugin.invoke(MENU, &ui).await.unwrap();

    let report = plugin.last_report().unwrap();
    assert_eq!(report.processed, vec!["Feature-1", "Feature-3"]);
    assert!(h.devices.scan_rotation.writes().is_empty());
    assert_eq!(statuses(&h.main), vec![RoughMilled, Deactive, Active]);
    assert!(h.exported_files().iter().all(|f| f.contains("ImgAcq")));
}

#[tokio::test(start_paused = true)]
async fn cancel_button_does_nothing() {
    let h = harness();
    h.main.features.set(features(&[Active])).unwrap();
    let plugin = AutoRoughMill::new(&h.main).unwrap();

    plugin
        .invoke(MENU, &ScriptedUi::new().press("Cancel"))
        .await
        .unwrap();

    assert!(plugin.last_report().is_none());
    assert!(h.devices.stage.history().is_empty());
    assert_eq!(statuses(&h.main), vec![Active]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_resets_streams() {
    let h = harness();
    h.main.features.set(features(&[Active, Active])).unwrap();
    for stream in h.main.streams() {
        stream.set_should_update(true);
    }
    let plugin = AutoRoughMill::new(&h.main).unwrap();

    let ui = ScriptedUi::new()
        .set("act", json!(2))
        .press("Run action")
        .cancelling();
    plugin.invoke(MENU, &ui).await.unwrap();

    let report = plugin.last_report().unwrap();
    assert_eq!(report.outcome, SequenceOutcome::Cancelled);
    assert!(report.processed.is_empty());
    assert!(h.devices.stage.history().is_empty());
    assert_eq!(statuses(&h.main), vec![Active, Active]);
    for (name, live, single) in h.stream_flags() {
        if name == "Secondary electrons" {
            assert!(live, "electron stream must be left alone");
        } else {
            assert!(!live && !single, "{name} still acquiring");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_milling_keeps_the_feature_active() {
    let h = harness();
    h.main.features.set(features(&[Active, Active])).unwrap();
    let plugin = Arc::new(AutoRoughMill::new(&h.main).unwrap());
    let ui = Arc::new(ScriptedUi::new().set("act", json!(1)).press("Run action"));

    let task = {
        let (plugin, ui) = (plugin.clone(), ui.clone());
        tokio::spawn(async move {
            let ui: &dyn UserInterface = ui.as_ref();
            plugin.invoke(MENU, ui).await
        })
    };
    while h.devices.scan_rotation.writes().is_empty() {
        sleep(Duration::from_millis(100)).await;
    }
    assert!(ui.tracked()[0].cancel());
    task.await.unwrap().unwrap();

    let report = plugin.last_report().unwrap();
    assert_eq!(report.outcome, SequenceOutcome::Cancelled);
    assert!(report.processed.is_empty());
    assert_eq!(report.captures.len(), 1);
    assert_eq!(statuses(&h.main), vec![Active, Active]);
    assert_eq!(h.devices.scan_rotation.writes().len(), 1);
    assert!(h.stream_flags().iter().all(|(_, live, single)| !live && !single));
}

#[tokio::test(start_paused = true)]
async fn cancelled_between_features_keeps_finished_work() {
    let h = harness();
    h.main
        .features
        .set(features(&[Active, Active, Active]))
        .unwrap();
    let mut first = h.main.features.get()[0].status_observable().subscribe();
    let plugin = Arc::new(AutoRoughMill::new(&h.main).unwrap());
    let ui = Arc::new(ScriptedUi::new().set("act", json!(1)).press("Run action"));

    let task = {
        let (plugin, ui) = (plugin.clone(), ui.clone());
        tokio::spawn(async move {
            let ui: &dyn UserInterface = ui.as_ref();
            plugin.invoke(MENU, ui).await
        })
    };
    first.wait_for(|s| *s == RoughMilled).await.unwrap();
    assert!(ui.tracked()[0].cancel());
    task.await.unwrap().unwrap();

    let report = plugin.last_report().unwrap();
    assert_eq!(report.outcome, SequenceOutcome::Cancelled);
    assert_eq!(report.processed, vec!["Feature-1"]);
    assert_eq!(report.captures.len(), 2);
    assert_eq!(statuses(&h.main), vec![RoughMilled, Active, Active]);
    assert_eq!(h.devices.scan_rotation.writes().len(), 1);
    assert_eq!(ui.tracked()[0].state(), TaskState::Cancelled);
    assert!(h.stream_flags().iter().all(|(_, live, single)| !live && !single));
}

#[tokio::test(start_paused = true)]
async fn stage_failure_stops_the_run_after_cleanup() {
    let h = harness();
    h.main.features.set(features(&[Active, Active])).unwrap();
    let mut first = h.main.features.get()[0].status_observable().subscribe();
    let plugin = Arc::new(AutoRoughMill::new(&h.main).unwrap());
    let ui = Arc::new(ScriptedUi::new().set("act", json!(1)).press("Run action"));

    let task = {
        let (plugin, ui) = (plugin.clone(), ui.clone());
        tokio::spawn(async move {
            let ui: &dyn UserInterface = ui.as_ref();
            plugin.invoke(MENU, ui).await
        })
    };
    first.wait_for(|s| *s == RoughMilled).await.unwrap();
    h.devices.stage.fail_next_move("x stalled");
    let err = task.await.unwrap().unwrap_err();

    assert!(err.to_string().contains("x stalled"), "{err}");
    assert_eq!(statuses(&h.main), vec![RoughMilled, Active]);
    assert_eq!(h.devices.scan_rotation.writes().len(), 1);
    assert_eq!(ui.tracked()[0].state(), TaskState::Finished);
    assert!(h.stream_flags().iter().all(|(_, live, single)| !live && !single));
}
