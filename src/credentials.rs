use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{error, info};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Portal login. The password never appears in `Debug` output.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

pub trait CredentialStore: Send + Sync {
    fn get_credentials(&self) -> Option<Credentials>;
}

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    username: String,
    password: String,
}

/// Credentials kept as a JSON file in the data directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let stored = StoredCredentials {
            username: credentials.username.clone(),
            password: credentials.password.expose_secret().to_string(),
        };
        fs::write(&self.path, serde_json::to_string(&stored)?)
            .with_context(|| format!("Failed to write credentials to {}", self.path.display()))?;
        info!("Credentials saved");
        Ok(())
    }

    pub fn clear_credentials(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }

    fn read(&self) -> Result<Option<Credentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let stored: StoredCredentials = serde_json::from_str(&contents)?;
        Ok(Some(Credentials {
            username: stored.username,
            password: SecretString::from(stored.password),
        }))
    }
}

impl CredentialStore for FileCredentialStore {
    fn get_credentials(&self) -> Option<Credentials> {
        match self.read() {
            Ok(credentials) => credentials,
            Err(err) => {
                error!("Failed to retrieve credentials: {err:#}");
                None
            }
        }
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Option<Credentials>);

impl CredentialStore for StaticCredentials {
    fn get_credentials(&self) -> Option<Credentials> {
        self.0.clone()
    }
}
