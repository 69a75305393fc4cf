//! Delayed notification delivery.
//!
//! Deciding to notify and actually showing something are decoupled: callers
//! enqueue by id, and a 1-second `tick()` delivers due entries unless the
//! user is busy (quiet mode, meeting, game) or the id is cooling down.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use chrono::{DateTime, Duration, Local};
use log::info;

use crate::{
    clock::Clock,
    config::NotificationPreferences,
    log_verbose,
    work::{StateChange, StateNotification, WorkState, WorkStateListener},
};

use super::{display::NotificationDisplay, presence::PresenceProbe};

/// Minimum spacing between two deliveries of the same id.
pub const NOTIFICATION_COOLDOWN_MS: i64 = 2 * 60 * 1000;
pub const BREAK_REMINDER_ID: &str = "break-reminder";
pub const BREAK_REMINDER_DELAY_MS: u64 = 45 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub deliver_at: DateTime<Local>,
    pub force_show: bool,
}

#[derive(Default)]
struct QueueState {
    /// At most one entry per id.
    pending: Vec<Notification>,
    last_delivered: HashMap<String, DateTime<Local>>,
}

impl QueueState {
    /// Whether some entry is past its deadline and out of cooldown.
    fn has_deliverable(&self, now: DateTime<Local>) -> bool {
        self.pending.iter().any(|entry| {
            now >= entry.deliver_at && !in_cooldown(&self.last_delivered, &entry.id, now)
        })
    }
}

fn in_cooldown(
    last_delivered: &HashMap<String, DateTime<Local>>,
    id: &str,
    now: DateTime<Local>,
) -> bool {
    last_delivered
        .get(id)
        .is_some_and(|last| now - *last < Duration::milliseconds(NOTIFICATION_COOLDOWN_MS))
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    display: Arc<dyn NotificationDisplay>,
    presence: Arc<dyn PresenceProbe>,
    prefs: RwLock<NotificationPreferences>,
    queue: Mutex<QueueState>,
}

#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<SchedulerInner>,
}

impl NotificationScheduler {
    pub fn new(
        prefs: NotificationPreferences,
        clock: Arc<dyn Clock>,
        display: Arc<dyn NotificationDisplay>,
        presence: Arc<dyn PresenceProbe>,
    ) -> Self {
        info!("Initializing notification scheduler");
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                display,
                presence,
                prefs: RwLock::new(prefs),
                queue: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn schedule_notification(
        &self,
        id: &str,
        title: &str,
        body: &str,
        delay_ms: u64,
        force_show: bool,
    ) {
        let now = self.inner.clock.now();
        log_verbose!("Scheduling notification {id} (force: {force_show}, delay: {delay_ms}ms)");

        if force_show {
            self.queue().last_delivered.insert(id.to_string(), now);
            self.inner.display.notify(title, body, false, None);
            return;
        }

        let deliver_at = i64::try_from(delay_ms)
            .ok()
            .and_then(|ms| now.checked_add_signed(Duration::milliseconds(ms)))
            .unwrap_or_else(|| now + Duration::days(36_500));
        let mut queue = self.queue();
        match queue.pending.iter_mut().find(|pending| pending.id == id) {
            Some(existing) => {
                log_verbose!("Updating queued notification {id}");
                existing.title = title.to_string();
                existing.body = body.to_string();
                existing.deliver_at = deliver_at;
            }
            None => queue.pending.push(Notification {
                id: id.to_string(),
                title: title.to_string(),
                body: body.to_string(),
                deliver_at,
                force_show,
            }),
        }
    }

    /// Drops the pending entry for `id`; unknown ids are ignored.
    pub fn clear_notifications_by_id(&self, id: &str) {
        self.queue().pending.retain(|pending| pending.id != id);
    }

    /// Delivers whatever is due. Returns how many notifications were shown.
    pub fn tick(&self) -> usize {
        let now = self.inner.clock.now();
        if !self.queue().has_deliverable(now) {
            return 0;
        }

        // Probed outside the queue lock; the process scan can be slow.
        let suppress = self.should_suppress();

        let due = {
            let mut guard = self.queue();
            let QueueState {
                pending,
                last_delivered,
            } = &mut *guard;
            log_verbose!(
                "Processing notification queue: {} pending, suppressed: {suppress}",
                pending.len()
            );
            if suppress {
                return 0;
            }

            let mut delivered_ids = HashSet::new();
            let mut due = Vec::new();

            pending.retain(|entry| {
                if in_cooldown(last_delivered, &entry.id, now) {
                    log_verbose!("Notification {} in cooldown", entry.id);
                    return true;
                }
                if now < entry.deliver_at {
                    return true;
                }
                if delivered_ids.insert(entry.id.clone()) {
                    last_delivered.insert(entry.id.clone(), now);
                    due.push(entry.clone());
                }
                false
            });
            due
        };

        for entry in &due {
            log_verbose!("Showing notification {}", entry.id);
            self.inner.display.notify(&entry.title, &entry.body, false, None);
        }
        due.len()
    }

    pub fn should_suppress(&self) -> bool {
        let prefs = self.prefs();
        if prefs.quiet_mode {
            return true;
        }
        if prefs.suppress_during_calls && self.inner.presence.in_meeting() {
            return true;
        }
        prefs.suppress_during_gaming && self.inner.presence.is_gaming()
    }

    /// Swaps suppression preferences; entering quiet mode empties the queue.
    pub fn update_config(&self, prefs: NotificationPreferences) {
        let quiet = prefs.quiet_mode;
        log_verbose!("Notification preferences updated: {prefs:?}");
        match self.inner.prefs.write() {
            Ok(mut guard) => *guard = prefs,
            Err(poisoned) => *poisoned.into_inner() = prefs,
        }
        if quiet {
            self.queue().pending.clear();
        }
    }

    pub fn handle_state_change(&self, state: WorkState, notification: Option<&StateNotification>) {
        if let Some(notification) = notification {
            self.schedule_notification(
                &notification.id,
                &notification.title,
                &notification.body,
                notification.delay_ms,
                notification.force_show,
            );
        }

        if state == WorkState::Working {
            self.schedule_notification(
                BREAK_REMINDER_ID,
                "Break Reminder",
                "You have been working for 45 minutes. Consider taking a short break.",
                BREAK_REMINDER_DELAY_MS,
                false,
            );
        } else {
            self.clear_notifications_by_id(BREAK_REMINDER_ID);
        }
    }

    pub fn pending(&self) -> Vec<Notification> {
        self.queue().pending.clone()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.queue().pending.iter().map(|p| p.id.clone()).collect()
    }

    pub fn last_delivered(&self, id: &str) -> Option<DateTime<Local>> {
        self.queue().last_delivered.get(id).copied()
    }

    fn prefs(&self) -> NotificationPreferences {
        match self.inner.prefs.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, QueueState> {
        match self.inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl WorkStateListener for NotificationScheduler {
    fn on_work_state_change(&self, change: &StateChange) {
        // Dry runs and restore announcements carry nothing to deliver.
        if change.dry_run || change.previous == change.state {
            return;
        }
        self.handle_state_change(change.state, change.notification.as_ref());
    }
}
