use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "user-config.json";
pub const STATE_FILE: &str = "work-state.json";
pub const BUTTON_MAPPINGS_FILE: &str = "button-mappings.json";
pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkSchedule {
    pub start_time: ClockTime,
    /// Hours.
    pub work_duration: u32,
    /// Minutes.
    pub break_duration: u32,
    pub is_flexible: bool,
    /// Seven flags, Sunday first.
    pub workdays: [bool; 7],
}

impl Default for WorkSchedule {
    fn default() -> Self {
        Self {
            start_time: ClockTime { hour: 8, minute: 30 },
            work_duration: 8,
            break_duration: 30,
            is_flexible: true,
            workdays: [false, true, true, true, true, true, false],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    pub quiet_mode: bool,
    pub smart_flexibility: bool,
    pub work_mode_detection: bool,
    pub auto_check_in: bool,
    pub auto_check_out: bool,
    pub suppress_during_calls: bool,
    pub suppress_during_gaming: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            quiet_mode: false,
            smart_flexibility: true,
            work_mode_detection: true,
            auto_check_in: false,
            auto_check_out: false,
            suppress_during_calls: true,
            suppress_during_gaming: true,
        }
    }
}

/// All values in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InactivityThresholds {
    pub short_break_reminder: u64,
    pub long_break_reminder: u64,
    pub auto_break_suggestion: u64,
    pub auto_check_out: u64,
}

impl Default for InactivityThresholds {
    fn default() -> Self {
        Self {
            short_break_reminder: 240,
            long_break_reminder: 270,
            auto_break_suggestion: 15,
            auto_check_out: 30,
        }
    }
}

/// How the external portal automation is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortalSettings {
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    pub url: String,
    pub attempt_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            url: String::new(),
            attempt_timeout_secs: 60,
            max_attempts: 3,
            retry_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfig {
    pub schedule: WorkSchedule,
    pub notifications: NotificationPreferences,
    pub inactivity_thresholds: InactivityThresholds,
    pub portal: PortalSettings,
    pub debug: bool,
}

impl UserConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<UserConfig>,
}

impl ConfigStore {
    /// Loads the config file; a missing or malformed file yields defaults.
    pub fn new(path: PathBuf) -> Self {
        let data = if path.exists() {
            UserConfig::load(&path).unwrap_or_else(|err| {
                warn!("Using default config: {err}");
                UserConfig::default()
            })
        } else {
            UserConfig::default()
        };

        Self {
            path,
            data: RwLock::new(data),
        }
    }

    pub fn with_config(path: PathBuf, config: UserConfig) -> Self {
        Self {
            path,
            data: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> UserConfig {
        self.read().clone()
    }

    /// Writes the file first; the in-memory copy only changes on success.
    pub fn update(&self, config: UserConfig) -> Result<()> {
        self.persist(&config)?;
        *self.write() = config;
        Ok(())
    }

    pub fn reload(&self) -> Result<(), ConfigError> {
        let data = UserConfig::load(&self.path)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserConfig> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserConfig> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// `WORKTIME_DATA_DIR`, else the platform data directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("WORKTIME_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("worktime-tray"))
        .ok_or_else(|| anyhow!("no platform data directory available"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"{"schedule": {"startTime": {"hour": 7, "minute": 45}}, "notifications": {"quietMode": true}}"#,
        )
        .unwrap();

        let config = ConfigStore::new(path).get();
        assert_eq!(config.schedule.start_time, ClockTime { hour: 7, minute: 45 });
        assert_eq!(config.schedule.work_duration, 8);
        assert!(config.notifications.quiet_mode);
        assert!(config.notifications.suppress_during_calls);
        assert_eq!(config.inactivity_thresholds.auto_break_suggestion, 15);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "schedule = 'toml?'").unwrap();

        let store = ConfigStore::new(path);
        assert_eq!(store.get(), UserConfig::default());
        assert!(matches!(store.reload(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn update_persists_and_reload_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let store = ConfigStore::new(path.clone());

        let mut config = store.get();
        config.schedule.break_duration = 45;
        config.debug = true;
        store.update(config.clone()).unwrap();

        let other = ConfigStore::new(path);
        assert_eq!(other.get(), config);
        other.reload().unwrap();
        assert_eq!(other.get().schedule.break_duration, 45);
    }

    #[test]
    fn failed_write_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::create_dir(&path).unwrap();
        let store = ConfigStore::new(path);

        let mut config = store.get();
        config.notifications.quiet_mode = true;
        assert!(store.update(config).is_err());
        assert!(!store.get().notifications.quiet_mode);
    }

    #[test]
    fn config_uses_camel_case_keys() {
        let value = serde_json::to_value(UserConfig::default()).unwrap();
        assert_eq!(value["schedule"]["breakDuration"], 30);
        assert_eq!(value["inactivityThresholds"]["shortBreakReminder"], 240);
        assert_eq!(value["notifications"]["suppressDuringGaming"], true);
    }
}
