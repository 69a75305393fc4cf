//! Schedule and activity monitor.
//!
//! Polled once a minute by the runtime. Compares the clock against the
//! configured working hours and the idle time against the inactivity
//! thresholds, and raises reminders through the notification scheduler.
//! Lock/suspend alerts go straight to the display since they must never be
//! suppressed.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration as StdDuration,
};

use chrono::{DateTime, Datelike, Duration, Local, TimeZone};
use log::{info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    clock::Clock,
    config::ConfigStore,
    log_verbose,
    notify::{NotificationAction, NotificationDisplay, NotificationScheduler, BREAK_REMINDER_ID},
    work::{
        format_duration, lock_machine, SharedMachine, StateChange, TransitionOptions, WorkAction,
        WorkState, WorkStateListener,
    },
};

/// Spacing of the monitor's own reminders, on top of the scheduler cooldown.
pub const REMINDER_THROTTLE_MS: i64 = 5 * 60 * 1000;
pub const LOCK_FOLLOWUP_DELAY: StdDuration = StdDuration::from_secs(30);
const ACTIVE_IDLE_LIMIT_SECS: u64 = 60;

const MORNING_REMINDER_KEY: &str = "morning-reminder";
const END_OF_DAY_REMINDER_KEY: &str = "end-day-reminder";
const BREAK_OVERRUN_KEY: &str = "break-overrun";

/// Seconds since the last keyboard or mouse input.
pub trait IdleSource: Send + Sync {
    fn idle_seconds(&self) -> u64;
}

/// Idle reading fed from outside, e.g. by a desktop shell.
#[derive(Debug, Default)]
pub struct ManualIdle {
    seconds: AtomicU64,
}

impl ManualIdle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: u64) {
        self.seconds.store(seconds, Ordering::Relaxed);
    }
}

impl IdleSource for ManualIdle {
    fn idle_seconds(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    LockScreen,
    Suspend,
    Shutdown,
}

/// A menu or notification click asking the dispatcher to run an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: WorkAction,
    pub options: TransitionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub continuous_work_start: Option<DateTime<Local>>,
    pub expected_break_return: Option<DateTime<Local>>,
    pub last_break: Option<DateTime<Local>>,
    pub last_active: Option<DateTime<Local>>,
}

/// Follows committed state changes to know how long the user has been
/// working or on break.
pub struct ActivityTracker {
    config: Arc<ConfigStore>,
    state: Mutex<ActivitySnapshot>,
}

impl ActivityTracker {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            state: Mutex::new(ActivitySnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        self.lock().clone()
    }

    fn mark_active(&self, now: DateTime<Local>) {
        self.lock().last_active = Some(now);
    }

    fn lock(&self) -> MutexGuard<'_, ActivitySnapshot> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl WorkStateListener for ActivityTracker {
    fn on_work_state_change(&self, change: &StateChange) {
        if change.dry_run {
            return;
        }
        let now = change.at;
        log_verbose!("State change to {} at {}", change.state, now.format("%H:%M:%S"));

        let mut state = self.lock();
        match change.state {
            WorkState::Working => {
                state.continuous_work_start = Some(now);
                state.expected_break_return = None;
            }
            WorkState::Paused => {
                let break_minutes = self.config.get().schedule.break_duration;
                state.continuous_work_start = None;
                state.last_break = Some(now);
                state.expected_break_return =
                    Some(now + Duration::minutes(i64::from(break_minutes)));
            }
            WorkState::NotWorking | WorkState::Finished => {
                state.continuous_work_start = None;
                state.expected_break_return = None;
            }
        }
    }
}

pub struct WorkMonitor {
    machine: SharedMachine,
    scheduler: NotificationScheduler,
    config: Arc<ConfigStore>,
    clock: Arc<dyn Clock>,
    idle: Arc<dyn IdleSource>,
    display: Arc<dyn NotificationDisplay>,
    actions: UnboundedSender<ActionRequest>,
    tracker: Arc<ActivityTracker>,
    last_notified: Mutex<HashMap<&'static str, DateTime<Local>>>,
}

impl WorkMonitor {
    /// Builds the monitor and registers its activity tracker with the machine.
    pub fn new(
        machine: SharedMachine,
        scheduler: NotificationScheduler,
        config: Arc<ConfigStore>,
        clock: Arc<dyn Clock>,
        idle: Arc<dyn IdleSource>,
        display: Arc<dyn NotificationDisplay>,
        actions: UnboundedSender<ActionRequest>,
    ) -> Self {
        info!("Initializing work monitor");
        let tracker = Arc::new(ActivityTracker::new(config.clone()));
        lock_machine(&machine).add_listener(tracker.clone());

        Self {
            machine,
            scheduler,
            config,
            clock,
            idle,
            display,
            actions,
            tracker,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    pub fn check_user_activity(&self) {
        let now = self.clock.now();
        let idle_secs = self.idle.idle_seconds();
        let idle_ms = idle_secs.saturating_mul(1000);
        let state = lock_machine(&self.machine).state();
        let config = self.config.get();
        let thresholds = &config.inactivity_thresholds;
        let tracked = self.tracker.snapshot();

        log_verbose!(
            "Activity check at {}: state {state}, idle {}",
            now.format("%H:%M:%S"),
            format_duration(idle_ms)
        );

        match state {
            WorkState::Working => {
                if idle_ms >= minutes_ms(thresholds.auto_break_suggestion) {
                    log_verbose!("Triggering inactivity notification");
                    self.scheduler.schedule_notification(
                        "inactivity",
                        "Are you still working?",
                        &format!(
                            "You've been inactive for {}. Should I switch you to break mode?",
                            format_duration(idle_ms)
                        ),
                        0,
                        false,
                    );
                }

                if let Some(start) = tracked.continuous_work_start {
                    let worked = (now - start).num_milliseconds().max(0) as u64;
                    if worked >= minutes_ms(thresholds.short_break_reminder) {
                        log_verbose!("Continuous work for {}", format_duration(worked));
                        self.scheduler.schedule_notification(
                            BREAK_REMINDER_ID,
                            "Time for a Break",
                            "You've been working for a while. Taking regular breaks helps maintain productivity!",
                            0,
                            false,
                        );
                    }
                }
            }
            WorkState::Paused => {
                if let Some(expected) = tracked.expected_break_return {
                    if now > expected && self.throttle_open(BREAK_OVERRUN_KEY, now) {
                        let overtime = (now - expected).num_minutes();
                        log_verbose!("Break overrun by {overtime} minutes");
                        self.scheduler.schedule_notification(
                            "break-overrun",
                            "Break Time Extended",
                            &format!(
                                "Your {} minute break has been extended by {overtime} minutes. Ready to get back to work?",
                                config.schedule.break_duration
                            ),
                            0,
                            false,
                        );
                        self.mark_notified(BREAK_OVERRUN_KEY, now);
                    }
                }
            }
            WorkState::NotWorking | WorkState::Finished => {}
        }

        if idle_secs < ACTIVE_IDLE_LIMIT_SECS {
            self.tracker.mark_active(now);
        }
    }

    pub fn check_schedule_compliance(&self) {
        let now = self.clock.now();
        let schedule = self.config.get().schedule;

        let weekday = now.weekday().num_days_from_sunday() as usize;
        if !schedule.workdays[weekday] {
            log_verbose!("Not a workday, skipping schedule check");
            return;
        }

        let (state, finished) = {
            let machine = lock_machine(&self.machine);
            (machine.state(), machine.is_finished_for_today())
        };
        if finished {
            log_verbose!("Work finished for today, skipping schedule check");
            return;
        }

        let Some(scheduled_start) = now
            .date_naive()
            .and_hms_opt(schedule.start_time.hour, schedule.start_time.minute, 0)
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        else {
            warn!(
                "Configured start time {}:{:02} does not exist today",
                schedule.start_time.hour, schedule.start_time.minute
            );
            return;
        };
        let scheduled_end =
            scheduled_start.checked_add_signed(Duration::hours(i64::from(schedule.work_duration)));
        if scheduled_end.is_none() {
            warn!(
                "Work duration of {} hours is out of range, skipping end of day check",
                schedule.work_duration
            );
        }

        log_verbose!(
            "Schedule check at {}: start {}, end {:?}, state {state}",
            now.format("%H:%M"),
            scheduled_start.format("%H:%M"),
            scheduled_end.map(|end| end.format("%H:%M").to_string())
        );

        if state == WorkState::NotWorking && now > scheduled_start {
            let minutes_late = (now - scheduled_start).num_minutes();
            if self.throttle_open(MORNING_REMINDER_KEY, now) {
                if (15..30).contains(&minutes_late) {
                    info!("Sending late start reminder ({minutes_late} minutes late)");
                    self.scheduler.schedule_notification(
                        "late-start",
                        "Good morning!",
                        &format!(
                            "You planned to start at {}:{:02}. Don't forget to check in 🚀",
                            schedule.start_time.hour, schedule.start_time.minute
                        ),
                        0,
                        false,
                    );
                    self.mark_notified(MORNING_REMINDER_KEY, now);
                } else if minutes_late >= 30 {
                    info!("Sending very late start reminder ({minutes_late} minutes late)");
                    self.scheduler.schedule_notification(
                        "very-late-start",
                        "Still not working?",
                        "Let me know if you're starting later today. ⏰",
                        0,
                        false,
                    );
                    self.mark_notified(MORNING_REMINDER_KEY, now);
                }
            }
        }

        let Some(scheduled_end) = scheduled_end else {
            return;
        };
        if state == WorkState::Working && now > scheduled_end {
            let minutes_over = (now - scheduled_end).num_minutes();
            if self.throttle_open(END_OF_DAY_REMINDER_KEY, now) {
                if minutes_over < 30 {
                    self.scheduler.schedule_notification(
                        "end-of-day",
                        "Great job today!",
                        "You've completed your scheduled hours. Want to wrap up now? 🌟",
                        0,
                        false,
                    );
                } else {
                    self.scheduler.schedule_notification(
                        "overtime",
                        "Working Late",
                        "You're over your planned hours. Don't forget to check out! 🏁",
                        0,
                        false,
                    );
                }
                self.mark_notified(END_OF_DAY_REMINDER_KEY, now);
            }
        }
    }

    /// Raises the urgent "still clocked in" alert. Returns whether an alert
    /// went out, in which case the caller schedules the follow-up.
    pub fn handle_system_event(&self, event: SystemEvent) -> bool {
        if lock_machine(&self.machine).state() != WorkState::Working {
            return false;
        }
        log_verbose!("{event:?} detected while working");

        self.display.notify(
            "Work Timer Active ⚠️",
            "You are still clocked in! Remember to pause or stop your work timer before leaving.",
            true,
            self.pause_action(),
        );
        true
    }

    /// Second alert sent [`LOCK_FOLLOWUP_DELAY`] after a lock, if still working.
    pub fn send_lock_followup(&self) {
        if lock_machine(&self.machine).state() != WorkState::Working {
            return;
        }
        self.display.notify(
            "⚠️ Still Working ⚠️",
            "Your work timer is still running! Please pause or stop it if you're taking a break.",
            true,
            self.pause_action(),
        );
    }

    /// "Pause Timer" button that routes through the dispatcher like a menu click.
    fn pause_action(&self) -> Option<NotificationAction> {
        let action = lock_machine(&self.machine).action_to(WorkState::Paused)?;
        let actions = self.actions.clone();
        Some(NotificationAction::new("Pause Timer", move || {
            let request = ActionRequest {
                action,
                options: TransitionOptions::default(),
            };
            if actions.send(request).is_err() {
                warn!("Action channel closed, pause request dropped");
            }
        }))
    }

    fn throttle_open(&self, key: &'static str, now: DateTime<Local>) -> bool {
        match self.notified().get(key) {
            Some(last) => (now - *last).num_milliseconds() > REMINDER_THROTTLE_MS,
            None => true,
        }
    }

    fn mark_notified(&self, key: &'static str, now: DateTime<Local>) {
        self.notified().insert(key, now);
    }

    fn notified(&self) -> MutexGuard<'_, HashMap<&'static str, DateTime<Local>>> {
        match self.last_notified.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn minutes_ms(minutes: u64) -> u64 {
    minutes.saturating_mul(60_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::{NotificationPreferences, UserConfig},
        notify::{RecordingDisplay, StaticPresence},
        work::{shared, ButtonMappingStore, MemorySnapshotStore, StateMachine},
    };
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Harness {
        clock: Arc<ManualClock>,
        idle: Arc<ManualIdle>,
        display: Arc<RecordingDisplay>,
        scheduler: NotificationScheduler,
        machine: SharedMachine,
        monitor: WorkMonitor,
        requests: UnboundedReceiver<ActionRequest>,
    }

    /// 2024-03-04 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    fn harness(now: DateTime<Local>) -> Harness {
        harness_with(now, UserConfig::default())
    }

    fn harness_with(now: DateTime<Local>, config: UserConfig) -> Harness {
        let dir = std::env::temp_dir().join("worktime-monitor-tests");
        let clock = Arc::new(ManualClock::new(now));
        let idle = Arc::new(ManualIdle::new());
        let display = Arc::new(RecordingDisplay::new());
        let config = Arc::new(ConfigStore::with_config(dir.join("user-config.json"), config));
        let scheduler = NotificationScheduler::new(
            NotificationPreferences::default(),
            clock.clone(),
            display.clone(),
            Arc::new(StaticPresence::new()),
        );
        let machine = shared(StateMachine::new(
            Box::new(MemorySnapshotStore::new()),
            ButtonMappingStore::new(dir.join("no-mappings.json")),
        ));
        lock_machine(&machine).add_listener(Arc::new(scheduler.clone()));
        let (tx, requests) = mpsc::unbounded_channel();
        let monitor = WorkMonitor::new(
            machine.clone(),
            scheduler.clone(),
            config,
            clock.clone(),
            idle.clone(),
            display.clone(),
            tx,
        );
        Harness {
            clock,
            idle,
            display,
            scheduler,
            machine,
            monitor,
            requests,
        }
    }

    impl Harness {
        fn go(&self, next: WorkState) {
            let mut machine = lock_machine(&self.machine);
            let action = machine.action_to(next).unwrap();
            machine
                .transition(&action, self.clock.now(), TransitionOptions::default())
                .unwrap();
        }

        fn pending_non_forced(&self) -> Vec<String> {
            self.scheduler
                .pending_ids()
                .into_iter()
                .filter(|id| id != BREAK_REMINDER_ID)
                .collect()
        }
    }

    #[test]
    fn late_then_very_late_start_each_throttled() {
        let h = harness(at(4, 8, 46));
        h.monitor.check_schedule_compliance();
        assert_eq!(h.scheduler.pending_ids(), vec!["late-start"]);
        assert_eq!(h.scheduler.tick(), 1);
        assert_eq!(h.display.titles(), vec!["Good morning!"]);
        assert!(h.display.shown()[0].body.contains("8:30"));

        h.clock.set(at(4, 8, 48));
        h.monitor.check_schedule_compliance();
        assert!(h.scheduler.pending_ids().is_empty());

        h.clock.set(at(4, 9, 1));
        h.monitor.check_schedule_compliance();
        assert_eq!(h.scheduler.pending_ids(), vec!["very-late-start"]);
        assert_eq!(h.scheduler.tick(), 1);
        assert_eq!(h.display.titles()[1], "Still not working?");

        h.clock.set(at(4, 9, 4));
        h.monitor.check_schedule_compliance();
        assert!(h.scheduler.pending_ids().is_empty());
    }

    #[test]
    fn slightly_late_start_is_not_reported() {
        let h = harness(at(4, 8, 40));
        h.monitor.check_schedule_compliance();
        assert!(h.scheduler.pending_ids().is_empty());
    }

    #[test]
    fn weekends_and_finished_days_are_skipped() {
        let h = harness(at(3, 9, 30));
        h.monitor.check_schedule_compliance();
        assert!(h.scheduler.pending_ids().is_empty());

        let h = harness(at(4, 8, 0));
        h.go(WorkState::Working);
        h.clock.set(at(4, 9, 0));
        h.go(WorkState::Finished);
        h.clock.set(at(4, 10, 0));
        h.monitor.check_schedule_compliance();
        assert!(h.pending_non_forced().is_empty());
    }

    #[test]
    fn wrap_up_then_overtime_after_scheduled_end() {
        let h = harness(at(4, 8, 30));
        h.go(WorkState::Working);

        h.clock.set(at(4, 16, 40));
        h.monitor.check_schedule_compliance();
        assert_eq!(h.pending_non_forced(), vec!["end-of-day"]);
        h.scheduler.tick();
        assert!(h.display.titles().contains(&"Great job today!".to_string()));

        h.clock.set(at(4, 16, 42));
        h.monitor.check_schedule_compliance();
        assert!(h.pending_non_forced().is_empty());

        h.clock.set(at(4, 17, 5));
        h.monitor.check_schedule_compliance();
        assert!(h.pending_non_forced().contains(&"overtime".to_string()));
    }

    #[test]
    fn out_of_range_durations_are_skipped_not_fatal() {
        let mut config = UserConfig::default();
        config.schedule.work_duration = 3_000_000_000;
        config.schedule.break_duration = u32::MAX;

        let h = harness_with(at(4, 8, 46), config.clone());
        h.monitor.check_schedule_compliance();
        assert_eq!(h.scheduler.pending_ids(), vec!["late-start"]);

        let h = harness_with(at(4, 8, 30), config);
        h.go(WorkState::Working);
        h.clock.set(at(4, 23, 0));
        h.monitor.check_schedule_compliance();
        assert!(h.pending_non_forced().is_empty());

        h.go(WorkState::Paused);
        h.monitor.check_user_activity();
        assert!(h.monitor.tracker().snapshot().expected_break_return > Some(at(4, 23, 0)));
        assert!(h.pending_non_forced().is_empty());
    }

    #[test]
    fn idle_while_working_asks_if_still_working() {
        let h = harness(at(4, 10, 0));
        h.go(WorkState::Working);
        h.idle.set(20 * 60);
        h.monitor.check_user_activity();
        let pending = h.scheduler.pending();
        let inactivity = pending.iter().find(|n| n.id == "inactivity").unwrap();
        assert_eq!(inactivity.title, "Are you still working?");
        assert!(inactivity.body.contains("0h 20m"));
    }

    #[test]
    fn long_stretch_replaces_break_reminder_with_immediate_one() {
        let h = harness(at(4, 8, 0));
        h.go(WorkState::Working);
        h.clock.set(at(4, 12, 0));
        h.monitor.check_user_activity();

        let pending = h.scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "Time for a Break");
        assert_eq!(pending[0].deliver_at, h.clock.now());
        assert_eq!(h.monitor.tracker().snapshot().last_active, Some(h.clock.now()));
    }

    #[test]
    fn break_overrun_is_throttled_to_five_minutes() {
        let h = harness(at(4, 11, 0));
        h.go(WorkState::Working);
        h.clock.set(at(4, 12, 0));
        h.go(WorkState::Paused);
        assert_eq!(
            h.monitor.tracker().snapshot().expected_break_return,
            Some(at(4, 12, 30))
        );

        h.clock.set(at(4, 12, 31));
        h.monitor.check_user_activity();
        assert_eq!(h.scheduler.tick(), 1);
        let overrun = h.display.shown().pop().unwrap();
        assert_eq!(overrun.title, "Break Time Extended");
        assert!(overrun.body.contains("extended by 1 minutes"));

        h.clock.set(at(4, 12, 35));
        h.monitor.check_user_activity();
        assert!(h.scheduler.pending_ids().is_empty());

        h.clock.set(at(4, 12, 37));
        h.monitor.check_user_activity();
        assert_eq!(h.scheduler.pending_ids(), vec!["break-overrun"]);
    }

    #[test]
    fn lock_while_working_offers_pause_through_dispatcher() {
        let mut h = harness(at(4, 10, 0));
        assert!(!h.monitor.handle_system_event(SystemEvent::LockScreen));
        assert!(h.display.shown().is_empty());

        h.go(WorkState::Working);
        assert!(h.monitor.handle_system_event(SystemEvent::Suspend));
        let alert = h.display.shown().pop().unwrap();
        assert!(alert.urgent);
        assert_eq!(alert.action.as_deref(), Some("Pause Timer"));

        // Clicking only requests the action; the machine is untouched.
        assert!(h.display.click_first_action());
        assert_eq!(lock_machine(&h.machine).state(), WorkState::Working);
        let request = h.requests.try_recv().unwrap();
        assert_eq!(request.action.next_state, WorkState::Paused);
        assert!(!request.options.dry_run);
    }

    #[test]
    fn followup_only_while_still_working() {
        let h = harness(at(4, 10, 0));
        h.go(WorkState::Working);
        h.monitor.send_lock_followup();
        assert_eq!(h.display.titles().last().unwrap(), "⚠️ Still Working ⚠️");

        h.go(WorkState::Paused);
        let shown = h.display.shown().len();
        h.monitor.send_lock_followup();
        assert_eq!(h.display.shown().len(), shown);
    }

    #[test]
    fn tracker_ignores_dry_runs() {
        let h = harness(at(4, 10, 0));
        let mut machine = lock_machine(&h.machine);
        let start = machine.action_to(WorkState::Working).unwrap();
        machine
            .transition(&start, h.clock.now(), TransitionOptions::dry_run())
            .unwrap();
        drop(machine);
        assert_eq!(h.monitor.tracker().snapshot(), ActivitySnapshot::default());
    }
}
