use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    Mutex,
};

use chrono::{DateTime, Duration, Local, TimeZone};

/// Source of "now" for every time-dependent component.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Wall clock with an optional debug offset.
///
/// The offset only applies while debug mode is on, so a stale offset left
/// behind in a release session never skews tracking.
#[derive(Debug, Default)]
pub struct SystemClock {
    debug: AtomicBool,
    offset_ms: AtomicI64,
}

impl SystemClock {
    pub fn new(debug: bool) -> Self {
        Self {
            debug: AtomicBool::new(debug),
            offset_ms: AtomicI64::new(0),
        }
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Shift the clock so it reads today at `hour:minute`.
    ///
    /// Returns `false` when that local time does not exist today.
    pub fn set_time(&self, hour: u32, minute: u32) -> bool {
        let real = Local::now();
        let Some(target) = real
            .date_naive()
            .and_hms_opt(hour, minute, 0)
            .and_then(|naive| Local.from_local_datetime(&naive).single())
        else {
            return false;
        };

        let offset = (target - real).num_milliseconds();
        self.offset_ms.store(offset, Ordering::Relaxed);
        log::info!(
            "Debug time set to {} (offset {})",
            target.format("%H:%M:%S"),
            crate::work::format_duration(offset.unsigned_abs())
        );
        true
    }

    pub fn reset_offset(&self) {
        self.offset_ms.store(0, Ordering::Relaxed);
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        let now = Local::now();
        if self.debug.load(Ordering::Relaxed) {
            now + Duration::milliseconds(self.offset_ms())
        } else {
            now
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Local>) {
        *self.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Local>> {
        match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.lock()
    }
}
