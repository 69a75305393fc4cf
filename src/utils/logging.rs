//! Logger setup plus a verbose logging macro gated on debug mode.
//!
//! Usage:
//! ```ignore
//! use crate::log_verbose;
//!
//! log_verbose!("queue has {} entries", queue.len());
//! ```
//!
//! Unlike plain `log::debug!`, verbose output is switched at runtime from the
//! user config (or `WORKTIME_DEBUG=1`) without touching `RUST_LOG`.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Initialise `env_logger` (reads RUST_LOG, defaults to info).
pub fn init() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// True when `WORKTIME_DEBUG` is `1` or `true`.
pub fn debug_env() -> bool {
    std::env::var("WORKTIME_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Info-level logging that only fires while debug mode is enabled.
#[macro_export]
macro_rules! log_verbose {
    ($($arg:tt)*) => {
        if $crate::utils::logging::verbose() {
            log::info!($($arg)*);
        }
    };
}
