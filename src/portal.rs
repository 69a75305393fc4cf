//! Boundary to the time-clock web portal.
//!
//! The browser automation itself lives outside this crate. The tracker only
//! knows how to ask for "press button X (or the one labelled Y)" and whether
//! that verifiably happened.

use std::{future::Future, path::PathBuf, pin::Pin, process::Stdio, sync::Arc, time::Duration};

use log::{debug, info, warn};
use secrecy::ExposeSecret;
use tokio::{process::Command, time};

use crate::{
    config::{ConfigStore, PortalSettings},
    credentials::Credentials,
    error::PortalError,
};

pub type PortalFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PortalError>> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct PortalRequest {
    pub button_id: String,
    pub button_text: String,
    pub dry_run: bool,
    pub credentials: Credentials,
}

/// Logs in, locates the control by id or text, clicks it (or only locates it
/// on a dry run), checks for an error marker and logs out.
pub trait PortalExecutor: Send + Sync {
    fn execute<'a>(&'a self, request: &'a PortalRequest) -> PortalFuture<'a>;
}

const EXIT_ELEMENT_NOT_FOUND: i32 = 2;
const EXIT_ERROR_MARKER: i32 = 3;
const EXIT_LOGIN_FAILED: i32 = 4;

/// Runs an external automation program once per attempt.
///
/// The program receives `--button-id`, `--button-text`, `--url` and
/// `--dry-run` arguments plus `PORTAL_USERNAME`/`PORTAL_PASSWORD` in its
/// environment, and reports through its exit code: 0 success, 2 button not
/// found, 3 error marker on the page, 4 login failed.
#[derive(Debug, Clone)]
pub struct CommandPortal {
    program: PathBuf,
    args: Vec<String>,
    url: String,
    attempt_timeout: Duration,
    max_attempts: u32,
    retry_interval: Duration,
}

impl CommandPortal {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let defaults = PortalSettings::default();
        Self {
            program: program.into(),
            args,
            url: defaults.url,
            attempt_timeout: Duration::from_secs(defaults.attempt_timeout_secs),
            max_attempts: defaults.max_attempts,
            retry_interval: Duration::from_millis(defaults.retry_interval_ms),
        }
    }

    pub fn from_settings(settings: &PortalSettings) -> Option<Self> {
        let program = settings.command.clone()?;
        Some(
            Self::new(program, settings.args.clone())
                .with_url(settings.url.clone())
                .with_attempt_timeout(Duration::from_secs(settings.attempt_timeout_secs))
                .with_retry(
                    settings.max_attempts,
                    Duration::from_millis(settings.retry_interval_ms),
                ),
        )
    }

    pub fn with_url(mut self, url: String) -> Self {
        self.url = url;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_interval = interval;
        self
    }

    async fn run(&self, request: &PortalRequest) -> Result<(), PortalError> {
        let mut attempt = 1;
        loop {
            match self.run_once(request).await {
                Err(PortalError::ElementNotFound { .. }) if attempt < self.max_attempts => {
                    debug!(
                        "Button {} not found (attempt {attempt}/{}), retrying",
                        request.button_id, self.max_attempts
                    );
                    attempt += 1;
                    time::sleep(self.retry_interval).await;
                }
                Err(PortalError::ElementNotFound { button_id, .. }) => {
                    return Err(PortalError::ElementNotFound {
                        button_id,
                        attempts: attempt,
                    })
                }
                other => return other,
            }
        }
    }

    async fn run_once(&self, request: &PortalRequest) -> Result<(), PortalError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--button-id")
            .arg(&request.button_id)
            .arg("--button-text")
            .arg(&request.button_text)
            .env("PORTAL_USERNAME", &request.credentials.username)
            .env(
                "PORTAL_PASSWORD",
                request.credentials.password.expose_secret(),
            )
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !self.url.is_empty() {
            command.arg("--url").arg(&self.url);
        }
        if request.dry_run {
            command.arg("--dry-run");
        }

        let output = time::timeout(self.attempt_timeout, command.output())
            .await
            .map_err(|_| PortalError::Timeout {
                secs: self.attempt_timeout.as_secs(),
            })?
            .map_err(|err| PortalError::Spawn(format!("{}: {err}", self.program.display())))?;

        match output.status.code() {
            Some(0) => {
                info!(
                    "Portal {} button {}",
                    if request.dry_run { "located" } else { "clicked" },
                    request.button_id
                );
                Ok(())
            }
            Some(EXIT_ELEMENT_NOT_FOUND) => Err(PortalError::ElementNotFound {
                button_id: request.button_id.clone(),
                attempts: 1,
            }),
            Some(EXIT_ERROR_MARKER) => Err(PortalError::ErrorMarker {
                button_id: request.button_id.clone(),
            }),
            Some(EXIT_LOGIN_FAILED) => Err(PortalError::LoginFailed),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("Portal automation exited with {code:?}: {}", stderr.trim());
                Err(PortalError::Navigation(match code {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                }))
            }
        }
    }
}

impl PortalExecutor for CommandPortal {
    fn execute<'a>(&'a self, request: &'a PortalRequest) -> PortalFuture<'a> {
        Box::pin(self.run(request))
    }
}

/// Reads the portal settings at every call so saved settings apply at once.
pub struct ConfiguredPortal {
    config: Arc<ConfigStore>,
}

impl ConfiguredPortal {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }
}

impl PortalExecutor for ConfiguredPortal {
    fn execute<'a>(&'a self, request: &'a PortalRequest) -> PortalFuture<'a> {
        let portal = CommandPortal::from_settings(&self.config.get().portal);
        Box::pin(async move {
            match portal {
                Some(portal) => portal.run(request).await,
                None => Err(PortalError::NotConfigured),
            }
        })
    }
}
