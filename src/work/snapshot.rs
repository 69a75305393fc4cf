use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

use super::WorkState;

/// On-disk shape of the session, the sole recovery source after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub current_state: WorkState,
    /// Epoch milliseconds.
    pub start_time: Option<i64>,
    /// Milliseconds.
    pub total_worked_time: u64,
}

pub trait SnapshotStore: Send {
    /// `Ok(None)` when nothing was ever saved.
    fn load(&self) -> Result<Option<SessionSnapshot>, PersistenceError>;
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError>;
}

pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self) -> Result<Option<SessionSnapshot>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|err| self.io_error(err))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }

        // Write-then-rename so a crash mid-write leaves the previous snapshot intact.
        let tmp = self.path.with_extension("json.tmp");
        let serialized = serde_json::to_string(snapshot)?;
        fs::write(&tmp, serialized).map_err(|err| self.io_error(err))?;
        fs::rename(&tmp, &self.path).map_err(|err| self.io_error(err))
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: Option<SessionSnapshot>,
    writes: usize,
    fail_writes: bool,
}

/// Snapshot store kept in memory; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SessionSnapshot) -> Self {
        let store = Self::default();
        store.lock().snapshot = Some(snapshot);
        store
    }

    pub fn saved(&self) -> Option<SessionSnapshot> {
        self.lock().snapshot.clone()
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<SessionSnapshot>, PersistenceError> {
        Ok(self.lock().snapshot.clone())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        let mut guard = self.lock();
        if guard.fail_writes {
            return Err(PersistenceError::Io {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "write refused"),
            });
        }
        guard.snapshot = Some(snapshot.clone());
        guard.writes += 1;
        Ok(())
    }
}
