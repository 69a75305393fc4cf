pub mod display;
pub mod presence;
pub mod scheduler;

pub use display::{LogDisplay, NotificationAction, NotificationDisplay, RecordingDisplay};
pub use presence::{platform_probe, PresenceProbe, ProcessScanProbe, StaticPresence};
pub use scheduler::{Notification, NotificationScheduler, BREAK_REMINDER_ID};
