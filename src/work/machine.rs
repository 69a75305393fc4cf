//! Work/break state machine.
//!
//! Owns the single daily session, validates every transition against the
//! adjacency table, accounts worked time and persists a snapshot after each
//! committed transition. Listeners are invoked synchronously once a
//! transition has been applied; they must not call back into the machine.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, TimeZone};
use log::{error, info, warn};
use serde::Serialize;

use crate::error::{InvalidActionError, PersistenceError};

use super::{
    buttons::{resolve_button_id, ButtonMapping, ButtonMappingStore},
    default_actions, format_duration,
    snapshot::{SessionSnapshot, SnapshotStore},
    WorkAction, WorkState,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionOptions {
    pub dry_run: bool,
}

impl TransitionOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// Notification payload produced by a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNotification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub delay_ms: u64,
    pub force_show: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub previous: WorkState,
    /// Edge target as requested; may be `Finished`.
    pub target: WorkState,
    /// Resting state after normalization.
    pub state: WorkState,
    /// When the new state was entered.
    pub at: DateTime<Local>,
    /// Length of the WORKING stretch this transition closed.
    pub elapsed_ms: Option<u64>,
    /// What a committed transition announces. Always computed, even for dry runs.
    pub preview: Option<StateNotification>,
    /// What listeners should deliver. `None` for dry runs.
    pub notification: Option<StateNotification>,
    pub dry_run: bool,
}

pub trait WorkStateListener: Send + Sync {
    fn on_work_state_change(&self, change: &StateChange);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub state: WorkState,
    /// Set exactly while `state == Working`.
    pub start_time: Option<DateTime<Local>>,
    pub total_worked_ms: u64,
    pub finished_for_today: bool,
}

impl Session {
    /// Applies the edge to `next_state`, returning the worked stretch it closed.
    fn apply(&mut self, next_state: WorkState, now: DateTime<Local>) -> Option<u64> {
        let mut elapsed = None;

        if matches!(next_state, WorkState::Paused | WorkState::Finished) {
            if let Some(start) = self.start_time.take() {
                let ms = (now - start).num_milliseconds().max(0) as u64;
                self.total_worked_ms = self.total_worked_ms.saturating_add(ms);
                elapsed = Some(ms);
            }
        }

        match next_state {
            WorkState::Working => {
                self.start_time = Some(now);
                self.finished_for_today = false;
            }
            WorkState::Finished => {
                self.finished_for_today = true;
                self.total_worked_ms = 0;
            }
            _ => {}
        }

        self.state = next_state.normalized();
        elapsed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_state: self.state,
            start_time: self.start_time.map(|start| start.timestamp_millis()),
            total_worked_time: self.total_worked_ms,
        }
    }

    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Result<Self, PersistenceError> {
        let state = snapshot.current_state.normalized();
        let start_time = match snapshot.start_time {
            Some(ms) => Some(Local.timestamp_millis_opt(ms).single().ok_or_else(|| {
                PersistenceError::Corrupt(format!("start time {ms} is out of range"))
            })?),
            None => None,
        };

        let start_time = match (state, start_time) {
            (WorkState::Working, None) => {
                return Err(PersistenceError::Corrupt(
                    "WORKING snapshot without a start time".into(),
                ))
            }
            (WorkState::Working, start) => start,
            (_, Some(_)) => {
                warn!("Dropping stale start time from {state} snapshot");
                None
            }
            (_, None) => None,
        };

        Ok(Self {
            state,
            start_time,
            total_worked_ms: snapshot.total_worked_time,
            finished_for_today: false,
        })
    }

    /// Worked time of the running stretch, zero unless working.
    pub fn current_session_ms(&self, now: DateTime<Local>) -> u64 {
        match (self.state, self.start_time) {
            (WorkState::Working, Some(start)) => (now - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }
}

pub struct StateMachine {
    session: Session,
    snapshots: Box<dyn SnapshotStore>,
    buttons: ButtonMappingStore,
    overrides: Vec<ButtonMapping>,
    listeners: Vec<Arc<dyn WorkStateListener>>,
}

impl StateMachine {
    /// Restores the last snapshot, or starts fresh if it cannot be read.
    pub fn new(snapshots: Box<dyn SnapshotStore>, buttons: ButtonMappingStore) -> Self {
        let session = match snapshots.load().and_then(|loaded| {
            loaded.map(|snapshot| Session::from_snapshot(&snapshot)).transpose()
        }) {
            Ok(Some(session)) => {
                info!(
                    "Restored {} session (worked today: {})",
                    session.state,
                    format_duration(session.total_worked_ms)
                );
                session
            }
            Ok(None) => Session::default(),
            Err(err) => {
                error!("Failed to restore state, starting fresh: {err}");
                Session::default()
            }
        };

        let overrides = buttons.load_or_default();

        Self {
            session,
            snapshots,
            buttons,
            overrides,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn WorkStateListener>) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> WorkState {
        self.session.state
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.session.start_time
    }

    pub fn total_worked_time(&self) -> u64 {
        self.session.total_worked_ms
    }

    pub fn is_finished_for_today(&self) -> bool {
        self.session.finished_for_today
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Actions out of the current state, button ids resolved through overrides.
    pub fn available_actions(&self) -> Vec<WorkAction> {
        let state = self.session.state;
        default_actions(state)
            .into_iter()
            .map(|mut action| {
                if let Some(id) = resolve_button_id(&self.overrides, state, &action.label) {
                    action.button_id = id.to_string();
                }
                action
            })
            .collect()
    }

    /// The available action leading to `next_state`, if any.
    pub fn action_to(&self, next_state: WorkState) -> Option<WorkAction> {
        self.available_actions()
            .into_iter()
            .find(|action| action.next_state == next_state)
    }

    pub fn transition(
        &mut self,
        action: &WorkAction,
        now: DateTime<Local>,
        options: TransitionOptions,
    ) -> Result<StateChange, InvalidActionError> {
        if !self
            .available_actions()
            .iter()
            .any(|candidate| candidate.same_edge(action))
        {
            return Err(InvalidActionError {
                label: action.label.clone(),
                state: self.session.state,
            });
        }

        let previous = self.session.state;
        let total_before = self.session.total_worked_ms;

        // Dry runs work on a throwaway copy so nothing observable changes.
        let mut next = self.session.clone();
        let elapsed_ms = next.apply(action.next_state, now);
        let day_total = total_before.saturating_add(elapsed_ms.unwrap_or(0));
        let preview = transition_notification(action.next_state, elapsed_ms, day_total, now);

        let change = StateChange {
            previous,
            target: action.next_state,
            state: next.state,
            at: now,
            elapsed_ms,
            notification: if options.dry_run { None } else { preview.clone() },
            preview,
            dry_run: options.dry_run,
        };

        if options.dry_run {
            info!("Dry run: {} would move {previous} -> {}", action.label, next.state);
        } else {
            info!("{}: {previous} -> {}", action.label, next.state);
            self.session = next;
        }

        self.emit(&change);

        if !options.dry_run {
            self.persist_state();
        }

        Ok(change)
    }

    /// Writes the snapshot; failures are logged and tracking carries on in memory.
    pub fn persist_state(&self) {
        if let Err(err) = self.snapshots.save(&self.session.snapshot()) {
            error!("Failed to persist state: {err}");
        }
    }

    /// Midnight rollover.
    pub fn reset_daily_time(&mut self) {
        self.session.total_worked_ms = 0;
        self.session.finished_for_today = false;
        info!("Daily worked time reset");
        self.persist_state();
    }

    pub fn reload_button_mappings(&mut self) {
        self.overrides = self.buttons.load_or_default();
        info!("Loaded {} button mapping override(s)", self.overrides.len());
    }

    /// Tells listeners about the current state without a notification, e.g. after restore.
    pub fn announce_state(&self, now: DateTime<Local>) {
        let state = self.session.state;
        let change = StateChange {
            previous: state,
            target: state,
            state,
            at: self.session.start_time.unwrap_or(now),
            elapsed_ms: None,
            preview: None,
            notification: None,
            dry_run: false,
        };
        self.emit(&change);
    }

    fn emit(&self, change: &StateChange) {
        for listener in &self.listeners {
            listener.on_work_state_change(change);
        }
    }
}

/// The one machine instance shared by the monitor, dispatcher and tickers.
pub type SharedMachine = Arc<Mutex<StateMachine>>;

pub fn shared(machine: StateMachine) -> SharedMachine {
    Arc::new(Mutex::new(machine))
}

/// Locks the shared machine, recovering from a poisoned lock.
pub fn lock_machine(machine: &Mutex<StateMachine>) -> MutexGuard<'_, StateMachine> {
    match machine.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn transition_notification(
    target: WorkState,
    elapsed_ms: Option<u64>,
    day_total_ms: u64,
    now: DateTime<Local>,
) -> Option<StateNotification> {
    let (id, title, body) = match target {
        WorkState::Working => (
            "work-started",
            "Work Started",
            format!("Started working at {}", now.format("%H:%M:%S")),
        ),
        WorkState::Paused => match elapsed_ms {
            Some(ms) if ms > 0 => (
                "work-paused",
                "Work Paused",
                format!("Worked for {} before break", format_duration(ms)),
            ),
            _ => return None,
        },
        WorkState::Finished => (
            "work-finished",
            "Work Finished",
            format!("Total work time: {}", format_duration(day_total_ms)),
        ),
        WorkState::NotWorking => return None,
    };

    Some(StateNotification {
        id: id.to_string(),
        title: title.to_string(),
        body,
        delay_ms: 0,
        force_show: true,
    })
}
