use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::WorkState;

/// Override of the portal button used for one action out of one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonMapping {
    pub state: WorkState,
    /// Action label, e.g. "Start Break".
    pub action: String,
    pub button_id: String,
}

/// JSON array of [`ButtonMapping`] written by the settings collaborator.
#[derive(Debug, Clone)]
pub struct ButtonMappingStore {
    path: PathBuf,
}

impl ButtonMappingStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<ButtonMapping>, ConfigError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Loads the overrides, falling back to none when the file is unusable.
    pub fn load_or_default(&self) -> Vec<ButtonMapping> {
        match self.load() {
            Ok(mappings) => mappings,
            Err(err) => {
                warn!("Ignoring button mappings: {err}");
                Vec::new()
            }
        }
    }

    pub fn save(&self, mappings: &[ButtonMapping]) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let serialized = serde_json::to_string_pretty(mappings).map_err(|source| {
            error!("Failed to serialize button mappings: {source}");
            ConfigError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, serialized).map_err(io_err)
    }
}

pub fn resolve_button_id<'a>(
    mappings: &'a [ButtonMapping],
    state: WorkState,
    label: &str,
) -> Option<&'a str> {
    mappings
        .iter()
        .find(|mapping| mapping.state == state && mapping.action == label)
        .map(|mapping| mapping.button_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::{START_BREAK, START_WORK};

    #[test]
    fn missing_file_means_no_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let store = ButtonMappingStore::new(dir.path().join("button-mappings.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn malformed_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("button-mappings.json");
        fs::write(&path, r#"[{"state": "SLEEPING"}]"#).unwrap();

        let store = ButtonMappingStore::new(path);
        assert!(matches!(store.load(), Err(ConfigError::Parse { .. })));
        assert!(store.load_or_default().is_empty());
    }

    #[test]
    fn saved_mappings_resolve_by_state_and_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = ButtonMappingStore::new(dir.path().join("nested/button-mappings.json"));
        let mappings = vec![ButtonMapping {
            state: WorkState::Working,
            action: START_BREAK.into(),
            button_id: "TerminalButton9".into(),
        }];
        store.save(&mappings).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, mappings);
        assert_eq!(
            resolve_button_id(&loaded, WorkState::Working, START_BREAK),
            Some("TerminalButton9")
        );
        assert_eq!(resolve_button_id(&loaded, WorkState::NotWorking, START_WORK), None);
    }
}
