//! Tray menu model.
//!
//! The menu is rebuilt from the machine's state on every refresh; a
//! [`TrayRenderer`] turns it into whatever the desktop shell shows.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use chrono::{DateTime, Local};
use log::info;

use crate::{
    clock::Clock,
    config::ConfigStore,
    log_verbose,
    monitor::ActionRequest,
    work::{format_duration, lock_machine, SharedMachine, StateMachine, TransitionOptions, WorkState},
};

pub const DRY_RUN_SUFFIX: &str = " (Dry Run)";

/// What clicking a menu entry asks the runtime to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    Action(ActionRequest),
    OpenSettings,
    /// Flips whether work actions only preview their outcome.
    ToggleDryRun,
    SetDebugTime { hour: u32, minute: u32 },
    ResetDebugTime,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEntry {
    /// Disabled informational line.
    Info(String),
    Separator,
    Item { label: String, command: MenuCommand },
    Submenu { label: String, entries: Vec<MenuEntry> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayMenu {
    pub title: String,
    pub entries: Vec<MenuEntry>,
}

impl TrayMenu {
    pub fn build(
        machine: &StateMachine,
        now: DateTime<Local>,
        dry_run_mode: bool,
        debug: bool,
    ) -> Self {
        let state = machine.state();
        let session_ms = machine.session().current_session_ms(now);
        let tracking = machine.start_time().is_some()
            && matches!(state, WorkState::Working | WorkState::Paused);

        let title = if tracking {
            format!("{} {}", state.emoji(), format_duration(session_ms))
        } else {
            state.emoji().to_string()
        };

        let mut entries = Vec::new();
        if tracking {
            entries.push(MenuEntry::Info(format!(
                "Current session: {}",
                format_duration(session_ms)
            )));
        }
        let total = machine.total_worked_time().saturating_add(session_ms);
        if total > 0 {
            entries.push(MenuEntry::Info(format!(
                "Total time today: {}",
                format_duration(total)
            )));
        }
        entries.push(MenuEntry::Separator);

        let options = TransitionOptions {
            dry_run: dry_run_mode,
        };
        for action in machine.available_actions() {
            let label = if dry_run_mode {
                format!("{}{DRY_RUN_SUFFIX}", action.label)
            } else {
                action.label.clone()
            };
            entries.push(MenuEntry::Item {
                label,
                command: MenuCommand::Action(ActionRequest { action, options }),
            });
        }

        entries.push(MenuEntry::Separator);
        entries.push(MenuEntry::Item {
            label: if dry_run_mode {
                "Disable Dry Run".into()
            } else {
                "Enable Dry Run".into()
            },
            command: MenuCommand::ToggleDryRun,
        });
        entries.push(MenuEntry::Item {
            label: "Settings".into(),
            command: MenuCommand::OpenSettings,
        });

        if debug {
            entries.push(MenuEntry::Separator);
            entries.push(MenuEntry::Submenu {
                label: "Debug: Set Time".into(),
                entries: debug_time_entries(),
            });
        }

        entries.push(MenuEntry::Separator);
        entries.push(MenuEntry::Item {
            label: "Quit".into(),
            command: MenuCommand::Quit,
        });

        Self { title, entries }
    }

    /// Every clickable command, submenus flattened.
    pub fn commands(&self) -> Vec<(&str, &MenuCommand)> {
        fn collect<'a>(entries: &'a [MenuEntry], out: &mut Vec<(&'a str, &'a MenuCommand)>) {
            for entry in entries {
                match entry {
                    MenuEntry::Item { label, command } => out.push((label.as_str(), command)),
                    MenuEntry::Submenu { entries, .. } => collect(entries, out),
                    MenuEntry::Info(_) | MenuEntry::Separator => {}
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.entries, &mut out);
        out
    }

    pub fn find(&self, label: &str) -> Option<&MenuCommand> {
        self.commands()
            .into_iter()
            .find(|(candidate, _)| *candidate == label)
            .map(|(_, command)| command)
    }
}

fn debug_time_entries() -> Vec<MenuEntry> {
    [
        ("Set to 8:15 AM (Start Day)", 8, 15),
        ("Set to 12:00 PM (Lunch)", 12, 0),
        ("Set to 4:45 PM (End Day)", 16, 45),
    ]
    .into_iter()
    .map(|(label, hour, minute)| MenuEntry::Item {
        label: label.into(),
        command: MenuCommand::SetDebugTime { hour, minute },
    })
    .chain(std::iter::once(MenuEntry::Item {
        label: "Reset Debug Time".into(),
        command: MenuCommand::ResetDebugTime,
    }))
    .collect()
}

/// Shows the menu in the desktop shell.
pub trait TrayRenderer: Send + Sync {
    fn render(&self, menu: &TrayMenu);
}

/// Logs the title and entries instead of drawing a tray icon.
#[derive(Debug, Default)]
pub struct LogTrayRenderer;

impl TrayRenderer for LogTrayRenderer {
    fn render(&self, menu: &TrayMenu) {
        log_verbose!("[tray] {}", menu.title);
        for (label, _) in menu.commands() {
            log_verbose!("[tray]   {label}");
        }
    }
}

/// Prints the menu once at info level; used for the startup banner.
pub fn log_menu(menu: &TrayMenu) {
    info!("Tray: {}", menu.title);
    for entry in &menu.entries {
        if let MenuEntry::Info(line) = entry {
            info!("Tray:   {line}");
        }
    }
}

/// Rebuilds and re-renders the menu on demand.
pub struct TrayController {
    machine: SharedMachine,
    clock: Arc<dyn Clock>,
    config: Arc<ConfigStore>,
    renderer: Arc<dyn TrayRenderer>,
    dry_run_mode: AtomicBool,
    current: Mutex<Option<TrayMenu>>,
}

impl TrayController {
    pub fn new(
        machine: SharedMachine,
        clock: Arc<dyn Clock>,
        config: Arc<ConfigStore>,
        renderer: Arc<dyn TrayRenderer>,
    ) -> Self {
        Self {
            machine,
            clock,
            config,
            renderer,
            dry_run_mode: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    pub fn set_dry_run_mode(&self, enabled: bool) {
        self.dry_run_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn dry_run_mode(&self) -> bool {
        self.dry_run_mode.load(Ordering::Relaxed)
    }

    /// Returns the new mode.
    pub fn toggle_dry_run_mode(&self) -> bool {
        let enabled = !self.dry_run_mode.fetch_xor(true, Ordering::Relaxed);
        info!("Dry run mode {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    pub fn refresh(&self) -> TrayMenu {
        let debug = self.config.get().debug;
        let menu = {
            let machine = lock_machine(&self.machine);
            TrayMenu::build(&machine, self.clock.now(), self.dry_run_mode(), debug)
        };
        self.renderer.render(&menu);
        *self.slot() = Some(menu.clone());
        menu
    }

    /// Last rendered menu.
    pub fn current(&self) -> Option<TrayMenu> {
        self.slot().clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<TrayMenu>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
