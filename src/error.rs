//! Error types shared across the tracker.
//!
//! Invalid actions and portal failures abort an action end to end without
//! touching the session. Persistence and config failures are absorbed where
//! they happen and only ever logged.

use std::path::PathBuf;
use thiserror::Error;

use crate::work::WorkState;

/// The requested action is not an edge out of the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid action '{label}' for state {state}")]
pub struct InvalidActionError {
    pub label: String,
    pub state: WorkState,
}

/// Failure reported by the external time-clock portal executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("portal automation is not configured")]
    NotConfigured,

    #[error("button '{button_id}' not found after {attempts} attempts")]
    ElementNotFound { button_id: String, attempts: u32 },

    #[error("portal reported an error after clicking '{button_id}'")]
    ErrorMarker { button_id: String },

    #[error("portal login failed")]
    LoginFailed,

    #[error("portal navigation failed: {0}")]
    Navigation(String),

    #[error("portal action timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("failed to launch portal automation: {0}")]
    Spawn(String),
}

/// Session snapshot could not be read or written.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("snapshot I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot is inconsistent: {0}")]
    Corrupt(String),
}

/// Persisted configuration or button mappings are unreadable.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// End-to-end outcome of a dispatched menu action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no portal credentials configured")]
    MissingCredentials,

    #[error(transparent)]
    InvalidAction(#[from] InvalidActionError),

    #[error(transparent)]
    Portal(#[from] PortalError),
}
