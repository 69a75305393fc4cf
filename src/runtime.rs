//! Wires the components together and drives them from tokio tasks.
//!
//! Tickers: notification delivery every second, activity and schedule checks
//! every minute (plus one schedule check at startup), a one-second menu
//! refresh while a session is running, and a one-shot midnight reset that
//! re-arms itself. Menu clicks, notification actions and lock/suspend events
//! arrive over channels. Everything stops on one cancellation token.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use log::{error, info, warn};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{Clock, SystemClock},
    config::{
        ConfigStore, UserConfig, BUTTON_MAPPINGS_FILE, CONFIG_FILE, CREDENTIALS_FILE, STATE_FILE,
    },
    credentials::{CredentialStore, FileCredentialStore},
    dispatcher::ActionDispatcher,
    log_verbose,
    monitor::{ActionRequest, IdleSource, ManualIdle, SystemEvent, WorkMonitor, LOCK_FOLLOWUP_DELAY},
    notify::{platform_probe, LogDisplay, NotificationDisplay, NotificationScheduler, PresenceProbe},
    portal::{ConfiguredPortal, PortalExecutor},
    tray::{log_menu, LogTrayRenderer, MenuCommand, TrayController, TrayRenderer},
    utils::logging,
    work::{
        lock_machine, shared, ButtonMapping, ButtonMappingStore, JsonSnapshotStore,
        SharedMachine, StateMachine, WorkState,
    },
};

const NOTIFICATION_TICK: Duration = Duration::from_secs(1);
const MONITOR_TICK: Duration = Duration::from_secs(60);
const MENU_TICK: Duration = Duration::from_secs(1);

/// Platform surfaces the core talks to.
pub struct Collaborators {
    pub display: Arc<dyn NotificationDisplay>,
    pub presence: Arc<dyn PresenceProbe>,
    pub idle: Arc<dyn IdleSource>,
    pub renderer: Arc<dyn TrayRenderer>,
    /// `None` uses the automation command from the user config.
    pub portal: Option<Arc<dyn PortalExecutor>>,
}

impl Collaborators {
    /// Logs notifications and the menu; no idle detection.
    pub fn headless() -> Self {
        Self {
            display: Arc::new(LogDisplay),
            presence: platform_probe(),
            idle: Arc::new(ManualIdle::new()),
            renderer: Arc::new(LogTrayRenderer),
            portal: None,
        }
    }
}

/// Senders for everything that can poke the running app from outside.
#[derive(Clone)]
pub struct Handles {
    pub commands: UnboundedSender<MenuCommand>,
    pub events: UnboundedSender<SystemEvent>,
}

struct Receivers {
    actions: UnboundedReceiver<ActionRequest>,
    commands: UnboundedReceiver<MenuCommand>,
    events: UnboundedReceiver<SystemEvent>,
}

pub struct App {
    pub clock: Arc<SystemClock>,
    pub config: Arc<ConfigStore>,
    pub credentials: Arc<FileCredentialStore>,
    pub machine: SharedMachine,
    pub scheduler: NotificationScheduler,
    pub monitor: Arc<WorkMonitor>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub tray: Arc<TrayController>,
    buttons: ButtonMappingStore,
    actions: UnboundedSender<ActionRequest>,
    handles: Handles,
    receivers: Option<Receivers>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    pub fn build(data_dir: &Path, collaborators: Collaborators) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        info!("Using data dir {}", data_dir.display());

        let config = Arc::new(ConfigStore::new(data_dir.join(CONFIG_FILE)));
        let user_config = config.get();
        let debug = user_config.debug || logging::debug_env();
        logging::set_verbose(debug);

        let clock = Arc::new(SystemClock::new(debug));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let buttons = ButtonMappingStore::new(data_dir.join(BUTTON_MAPPINGS_FILE));
        let machine = shared(StateMachine::new(
            Box::new(JsonSnapshotStore::new(data_dir.join(STATE_FILE))),
            buttons.clone(),
        ));

        let scheduler = NotificationScheduler::new(
            user_config.notifications.clone(),
            dyn_clock.clone(),
            collaborators.display.clone(),
            collaborators.presence,
        );
        lock_machine(&machine).add_listener(Arc::new(scheduler.clone()));

        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let monitor = Arc::new(WorkMonitor::new(
            machine.clone(),
            scheduler.clone(),
            config.clone(),
            dyn_clock.clone(),
            collaborators.idle,
            collaborators.display,
            action_tx.clone(),
        ));

        let tray = Arc::new(TrayController::new(
            machine.clone(),
            dyn_clock.clone(),
            config.clone(),
            collaborators.renderer,
        ));

        let credentials = Arc::new(FileCredentialStore::new(data_dir.join(CREDENTIALS_FILE)));
        let portal = collaborators
            .portal
            .unwrap_or_else(|| Arc::new(ConfiguredPortal::new(config.clone())));
        let dispatcher = Arc::new(ActionDispatcher::new(
            machine.clone(),
            scheduler.clone(),
            credentials.clone() as Arc<dyn CredentialStore>,
            portal,
            dyn_clock.clone(),
            tray.clone(),
        ));

        // Restored sessions prime the activity tracker.
        lock_machine(&machine).announce_state(clock.now());

        Ok(Self {
            clock,
            config,
            credentials,
            machine,
            scheduler,
            monitor,
            dispatcher,
            tray,
            buttons,
            actions: action_tx,
            handles: Handles {
                commands: command_tx,
                events: event_tx,
            },
            receivers: Some(Receivers {
                actions: action_rx,
                commands: command_rx,
                events: event_rx,
            }),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    pub fn handles(&self) -> Handles {
        self.handles.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the tickers and channel consumers. Calling it twice is a no-op.
    pub fn start(&mut self) {
        let Some(receivers) = self.receivers.take() else {
            warn!("App already started");
            return;
        };
        log_menu(&self.tray.refresh());

        self.tasks.push(tokio::spawn(notification_loop(
            self.scheduler.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(monitor_loop(
            self.monitor.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(menu_loop(
            self.machine.clone(),
            self.tray.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(midnight_loop(
            self.machine.clone(),
            self.tray.clone(),
            self.clock.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(action_loop(
            receivers.actions,
            self.dispatcher.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(event_loop(
            receivers.events,
            self.monitor.clone(),
            self.cancel.clone(),
        )));

        let commands = CommandHandler {
            clock: self.clock.clone(),
            config: self.config.clone(),
            tray: self.tray.clone(),
            actions: self.actions.clone(),
            cancel: self.cancel.clone(),
        };
        self.tasks
            .push(tokio::spawn(command_loop(receivers.commands, commands)));
        info!("Work time tracker running");
    }

    /// Saves the config and pushes it into every component that caches it.
    pub fn save_config(&self, updated: UserConfig) -> Result<()> {
        self.config.update(updated.clone())?;
        self.scheduler.update_config(updated.notifications);
        let debug = updated.debug || logging::debug_env();
        self.clock.set_debug(debug);
        logging::set_verbose(debug);
        self.tray.refresh();
        info!("Configuration saved");
        Ok(())
    }

    pub fn save_button_mappings(&self, mappings: &[ButtonMapping]) -> Result<()> {
        self.buttons
            .save(mappings)
            .context("Failed to save button mappings")?;
        lock_machine(&self.machine).reload_button_mappings();
        self.tray.refresh();
        Ok(())
    }

    /// Persists the session and stops every task.
    pub async fn shutdown(mut self) {
        info!("Shutting down");
        lock_machine(&self.machine).persist_state();
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    error!("Task failed during shutdown: {err}");
                }
            }
        }
    }
}

/// Handles menu clicks that do not need the dispatcher themselves.
struct CommandHandler {
    clock: Arc<SystemClock>,
    config: Arc<ConfigStore>,
    tray: Arc<TrayController>,
    actions: UnboundedSender<ActionRequest>,
    cancel: CancellationToken,
}

impl CommandHandler {
    fn handle(&self, command: MenuCommand) {
        match command {
            MenuCommand::Action(request) => {
                if self.actions.send(request).is_err() {
                    warn!("Action channel closed");
                }
            }
            MenuCommand::OpenSettings => {
                info!("Settings are stored in {}", self.config.path().display());
            }
            MenuCommand::ToggleDryRun => {
                self.tray.toggle_dry_run_mode();
                self.tray.refresh();
            }
            MenuCommand::SetDebugTime { hour, minute } => {
                if !self.clock.set_time(hour, minute) {
                    warn!("Cannot set debug time to {hour}:{minute:02}");
                }
                self.tray.refresh();
            }
            MenuCommand::ResetDebugTime => {
                self.clock.reset_offset();
                self.tray.refresh();
            }
            MenuCommand::Quit => self.cancel.cancel(),
        }
    }
}

async fn command_loop(mut commands: UnboundedReceiver<MenuCommand>, handler: CommandHandler) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => handler.handle(command),
                None => break,
            },
            _ = handler.cancel.cancelled() => break,
        }
    }
}

async fn notification_loop(scheduler: NotificationScheduler, cancel: CancellationToken) {
    let mut ticker = time::interval(NOTIFICATION_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A due entry may trigger a process scan.
                let tick = tokio::task::spawn_blocking({
                    let scheduler = scheduler.clone();
                    move || scheduler.tick()
                });
                if let Err(err) = tick.await {
                    error!("Notification tick worker join failed: {err}");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn monitor_loop(monitor: Arc<WorkMonitor>, cancel: CancellationToken) {
    monitor.check_schedule_compliance();

    let mut ticker = time::interval_at(Instant::now() + MONITOR_TICK, MONITOR_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                monitor.check_user_activity();
                monitor.check_schedule_compliance();
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn menu_loop(machine: SharedMachine, tray: Arc<TrayController>, cancel: CancellationToken) {
    let mut ticker = time::interval(MENU_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tracking = {
                    let machine = lock_machine(&machine);
                    let tracking = matches!(machine.state(), WorkState::Working | WorkState::Paused);
                    if tracking {
                        machine.persist_state();
                    }
                    tracking
                };
                if tracking {
                    tray.refresh();
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn midnight_loop(
    machine: SharedMachine,
    tray: Arc<TrayController>,
    clock: Arc<SystemClock>,
    cancel: CancellationToken,
) {
    loop {
        let wait = until_next_midnight(clock.now());
        log_verbose!("Daily reset in {}s", wait.as_secs());
        tokio::select! {
            _ = time::sleep(wait) => {
                lock_machine(&machine).reset_daily_time();
                tray.refresh();
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn action_loop(
    mut requests: UnboundedReceiver<ActionRequest>,
    dispatcher: Arc<ActionDispatcher>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            request = requests.recv() => match request {
                // One at a time; failures are logged by the dispatcher.
                Some(request) => {
                    let _ = dispatcher.perform_action(&request.action, request.options).await;
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}

async fn event_loop(
    mut events: UnboundedReceiver<SystemEvent>,
    monitor: Arc<WorkMonitor>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if monitor.handle_system_event(event) {
                        let monitor = monitor.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = time::sleep(LOCK_FOLLOWUP_DELAY) => monitor.send_lock_followup(),
                                _ = cancel.cancelled() => {}
                            }
                        });
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}

/// Time left until the next local midnight.
pub fn until_next_midnight(now: DateTime<Local>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest());
    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
        None => Duration::from_secs(60 * 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_is_measured_from_the_given_time() {
        let now = Local.with_ymd_and_hms(2024, 3, 4, 23, 59, 30).unwrap();
        assert_eq!(until_next_midnight(now), Duration::from_secs(30));

        let morning = Local.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap();
        assert_eq!(until_next_midnight(morning), Duration::from_secs(18 * 60 * 60));
    }

    #[test]
    fn commands_drive_clock_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(SystemClock::new(true));
        let config = Arc::new(ConfigStore::new(dir.path().join(CONFIG_FILE)));
        let machine = shared(StateMachine::new(
            Box::new(JsonSnapshotStore::new(dir.path().join(STATE_FILE))),
            ButtonMappingStore::new(dir.path().join(BUTTON_MAPPINGS_FILE)),
        ));
        let tray = Arc::new(TrayController::new(
            machine,
            clock.clone(),
            config.clone(),
            Arc::new(LogTrayRenderer),
        ));
        let (actions, mut requests) = mpsc::unbounded_channel();
        let handler = CommandHandler {
            clock: clock.clone(),
            config,
            tray: tray.clone(),
            actions,
            cancel: CancellationToken::new(),
        };

        handler.handle(MenuCommand::SetDebugTime { hour: 12, minute: 0 });
        assert_ne!(clock.offset_ms(), 0);
        assert!(tray.current().is_some());
        handler.handle(MenuCommand::ResetDebugTime);
        assert_eq!(clock.offset_ms(), 0);

        let start = crate::work::default_action_to(WorkState::NotWorking, WorkState::Working)
            .unwrap();
        let request = ActionRequest {
            action: start,
            options: Default::default(),
        };
        handler.handle(MenuCommand::Action(request.clone()));
        assert_eq!(requests.try_recv().unwrap(), request);

        handler.handle(MenuCommand::ToggleDryRun);
        assert!(tray.dry_run_mode());
        let menu = tray.current().unwrap();
        assert!(menu.find("Start Work (Dry Run)").is_some());
        handler.handle(MenuCommand::ToggleDryRun);
        assert!(!tray.dry_run_mode());

        handler.handle(MenuCommand::Quit);
        assert!(handler.cancel.is_cancelled());
    }
}
