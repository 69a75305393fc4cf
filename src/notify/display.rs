use std::sync::Mutex;

use log::{info, warn};

/// Invoked when the user clicks a notification's action button.
pub type ActionCallback = Box<dyn FnOnce() + Send + 'static>;

pub struct NotificationAction {
    pub label: String,
    pub callback: ActionCallback,
}

impl NotificationAction {
    pub fn new(label: impl Into<String>, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            callback: Box::new(callback),
        }
    }

    pub fn invoke(self) {
        (self.callback)();
    }
}

/// OS notification surface.
pub trait NotificationDisplay: Send + Sync {
    fn notify(&self, title: &str, body: &str, urgent: bool, action: Option<NotificationAction>);
}

/// Writes notifications to the log; used when no desktop shell is attached.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl NotificationDisplay for LogDisplay {
    fn notify(&self, title: &str, body: &str, urgent: bool, action: Option<NotificationAction>) {
        let action_label = action.as_ref().map(|a| a.label.as_str()).unwrap_or("-");
        if urgent {
            warn!("[notification] {title}: {body} (action: {action_label})");
        } else {
            info!("[notification] {title}: {body}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shown {
    pub title: String,
    pub body: String,
    pub urgent: bool,
    pub action: Option<String>,
}

/// Keeps everything it is asked to show; action callbacks can be fired later.
#[derive(Default)]
pub struct RecordingDisplay {
    shown: Mutex<Vec<Shown>>,
    actions: Mutex<Vec<NotificationAction>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Shown> {
        lock(&self.shown).clone()
    }

    pub fn titles(&self) -> Vec<String> {
        lock(&self.shown).iter().map(|s| s.title.clone()).collect()
    }

    /// Fires the oldest pending action callback, if any.
    pub fn click_first_action(&self) -> bool {
        let next = {
            let mut actions = lock(&self.actions);
            if actions.is_empty() {
                None
            } else {
                Some(actions.remove(0))
            }
        };
        match next {
            Some(action) => {
                action.invoke();
                true
            }
            None => false,
        }
    }
}

impl NotificationDisplay for RecordingDisplay {
    fn notify(&self, title: &str, body: &str, urgent: bool, action: Option<NotificationAction>) {
        lock(&self.shown).push(Shown {
            title: title.to_string(),
            body: body.to_string(),
            urgent,
            action: action.as_ref().map(|a| a.label.clone()),
        });
        if let Some(action) = action {
            lock(&self.actions).push(action);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
