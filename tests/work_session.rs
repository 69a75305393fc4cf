use std::sync::{Arc, Mutex};

use worktime_lib::{
    config::UserConfig,
    credentials::Credentials,
    error::{DispatchError, PortalError},
    monitor::ManualIdle,
    notify::{RecordingDisplay, StaticPresence},
    portal::{PortalExecutor, PortalFuture, PortalRequest},
    runtime::{App, Collaborators},
    tray::LogTrayRenderer,
    work::{lock_machine, ButtonMapping, TransitionOptions, WorkState, START_BREAK},
};

/// Portal that succeeds unless told to fail, remembering pressed buttons.
#[derive(Default)]
struct ScriptedPortal {
    fail_with: Mutex<Option<PortalError>>,
    pressed: Mutex<Vec<String>>,
}

impl PortalExecutor for ScriptedPortal {
    fn execute<'a>(&'a self, request: &'a PortalRequest) -> PortalFuture<'a> {
        let result = match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => {
                self.pressed.lock().unwrap().push(request.button_id.clone());
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

fn build(dir: &std::path::Path, portal: Arc<ScriptedPortal>) -> (App, Arc<RecordingDisplay>) {
    let display = Arc::new(RecordingDisplay::new());
    let app = App::build(
        dir,
        Collaborators {
            display: display.clone(),
            presence: Arc::new(StaticPresence::new()),
            idle: Arc::new(ManualIdle::new()),
            renderer: Arc::new(LogTrayRenderer),
            portal: Some(portal),
        },
    )
    .unwrap();
    (app, display)
}

#[tokio::test]
async fn session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let portal = Arc::new(ScriptedPortal::default());
    let (app, display) = build(dir.path(), portal.clone());
    app.credentials
        .save_credentials(&Credentials::new("jdoe", "hunter2"))
        .unwrap();

    let start = lock_machine(&app.machine)
        .action_to(WorkState::Working)
        .unwrap();
    app.dispatcher
        .perform_action(&start, TransitionOptions::default())
        .await
        .unwrap();
    let started_at = lock_machine(&app.machine).start_time().unwrap();
    assert_eq!(display.titles(), vec!["Work Started"]);
    drop(app);

    let (restored, display) = build(dir.path(), portal.clone());
    let machine = lock_machine(&restored.machine);
    assert_eq!(machine.state(), WorkState::Working);
    assert_eq!(
        machine.start_time().map(|t| t.timestamp_millis()),
        Some(started_at.timestamp_millis())
    );
    // A restore is not a new transition.
    assert!(display.shown().is_empty());
    assert_eq!(*portal.pressed.lock().unwrap(), vec!["TerminalButton4"]);
}

#[tokio::test]
async fn failed_portal_click_leaves_snapshot_alone() {
    let dir = tempfile::tempdir().unwrap();
    let portal = Arc::new(ScriptedPortal::default());
    let (app, _) = build(dir.path(), portal.clone());
    app.credentials
        .save_credentials(&Credentials::new("jdoe", "hunter2"))
        .unwrap();

    let start = lock_machine(&app.machine)
        .action_to(WorkState::Working)
        .unwrap();
    app.dispatcher
        .perform_action(&start, TransitionOptions::default())
        .await
        .unwrap();
    let snapshot_before = std::fs::read_to_string(dir.path().join("work-state.json")).unwrap();

    *portal.fail_with.lock().unwrap() = Some(PortalError::ErrorMarker {
        button_id: "TerminalButton6".into(),
    });
    let pause = lock_machine(&app.machine)
        .action_to(WorkState::Paused)
        .unwrap();
    let err = app
        .dispatcher
        .perform_action(&pause, TransitionOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Portal(PortalError::ErrorMarker { .. })));
    assert_eq!(lock_machine(&app.machine).state(), WorkState::Working);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("work-state.json")).unwrap(),
        snapshot_before
    );
}

#[tokio::test]
async fn saved_button_mappings_reach_the_portal() {
    let dir = tempfile::tempdir().unwrap();
    let portal = Arc::new(ScriptedPortal::default());
    let (app, _) = build(dir.path(), portal.clone());
    app.credentials
        .save_credentials(&Credentials::new("jdoe", "hunter2"))
        .unwrap();

    app.save_button_mappings(&[ButtonMapping {
        state: WorkState::Working,
        action: START_BREAK.into(),
        button_id: "TerminalButton9".into(),
    }])
    .unwrap();

    for next in [WorkState::Working, WorkState::Paused] {
        let action = lock_machine(&app.machine).action_to(next).unwrap();
        app.dispatcher
            .perform_action(&action, TransitionOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(
        *portal.pressed.lock().unwrap(),
        vec!["TerminalButton4", "TerminalButton9"]
    );
}

#[test]
fn saving_config_persists_and_enables_quiet_mode() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build(dir.path(), Arc::new(ScriptedPortal::default()));
    app.scheduler
        .schedule_notification("late-start", "Good morning!", "x", 60_000, false);

    let mut config = UserConfig::default();
    config.notifications.quiet_mode = true;
    config.schedule.break_duration = 45;
    app.save_config(config).unwrap();

    assert!(app.scheduler.pending().is_empty());
    assert!(app.scheduler.should_suppress());
    let saved = UserConfig::load(&dir.path().join("user-config.json")).unwrap();
    assert_eq!(saved.schedule.break_duration, 45);
}

#[test]
fn unwritable_config_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("user-config.json")).unwrap();
    let (app, _) = build(dir.path(), Arc::new(ScriptedPortal::default()));

    let mut config = UserConfig::default();
    config.notifications.quiet_mode = true;
    assert!(app.save_config(config).is_err());

    assert!(!app.config.get().notifications.quiet_mode);
    assert!(!app.scheduler.should_suppress());
}
