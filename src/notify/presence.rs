use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::log_verbose;

/// Process-name fragments of conferencing apps.
pub const MEETING_APPS: &[&str] = &[
    "zoom",
    "teams",
    "webex",
    "skype",
    "discord",
    "slack",
    "meet.google.com",
    "CptHost",
    "CiscoCollabHost",
];

/// Heuristics for "the user is busy, hold non-urgent notifications".
pub trait PresenceProbe: Send + Sync {
    fn in_meeting(&self) -> bool;

    fn is_gaming(&self) -> bool {
        false
    }
}

pub fn matches_meeting_app(process_name: &str) -> bool {
    let name = process_name.to_lowercase();
    MEETING_APPS
        .iter()
        .any(|app| name.contains(&app.to_lowercase()))
}

/// Scans the process table for known meeting apps.
pub struct ProcessScanProbe {
    system: Mutex<System>,
}

impl ProcessScanProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessScanProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceProbe for ProcessScanProbe {
    fn in_meeting(&self) -> bool {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );

        let hits: Vec<String> = system
            .processes()
            .values()
            .filter_map(|process| {
                let name = process.name().to_string_lossy();
                if matches_meeting_app(&name) {
                    return Some(name.into_owned());
                }
                let exe = process.exe()?.to_string_lossy();
                matches_meeting_app(&exe).then(|| exe.into_owned())
            })
            .collect();

        if !hits.is_empty() {
            log_verbose!("Detected meeting processes: {:?}", hits);
        }
        !hits.is_empty()
    }
}

/// Probe whose answers are set by hand.
#[derive(Debug, Default)]
pub struct StaticPresence {
    meeting: AtomicBool,
    gaming: AtomicBool,
}

impl StaticPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_in_meeting(&self, value: bool) {
        self.meeting.store(value, Ordering::Relaxed);
    }

    pub fn set_gaming(&self, value: bool) {
        self.gaming.store(value, Ordering::Relaxed);
    }
}

impl PresenceProbe for StaticPresence {
    fn in_meeting(&self) -> bool {
        self.meeting.load(Ordering::Relaxed)
    }

    fn is_gaming(&self) -> bool {
        self.gaming.load(Ordering::Relaxed)
    }
}

/// Probe used for this platform.
pub fn platform_probe() -> Arc<dyn PresenceProbe> {
    Arc::new(ProcessScanProbe::new())
}
