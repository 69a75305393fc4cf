//! Runs a menu action end to end: portal first, then the state machine.
//!
//! The session only advances after the portal confirmed the click, so the
//! local record never gets ahead of the official one.

use std::sync::Arc;

use log::{error, info};

use crate::{
    clock::Clock,
    credentials::CredentialStore,
    error::{DispatchError, InvalidActionError},
    notify::NotificationScheduler,
    portal::{PortalExecutor, PortalRequest},
    tray::TrayController,
    work::{lock_machine, SharedMachine, StateChange, TransitionOptions, WorkAction},
};

pub const CREDENTIALS_MISSING_ID: &str = "credentials-missing";

pub struct ActionDispatcher {
    machine: SharedMachine,
    scheduler: NotificationScheduler,
    credentials: Arc<dyn CredentialStore>,
    portal: Arc<dyn PortalExecutor>,
    clock: Arc<dyn Clock>,
    tray: Arc<TrayController>,
}

impl ActionDispatcher {
    pub fn new(
        machine: SharedMachine,
        scheduler: NotificationScheduler,
        credentials: Arc<dyn CredentialStore>,
        portal: Arc<dyn PortalExecutor>,
        clock: Arc<dyn Clock>,
        tray: Arc<TrayController>,
    ) -> Self {
        Self {
            machine,
            scheduler,
            credentials,
            portal,
            clock,
            tray,
        }
    }

    /// Refreshes the menu whatever the outcome.
    pub async fn perform_action(
        &self,
        action: &WorkAction,
        options: TransitionOptions,
    ) -> Result<StateChange, DispatchError> {
        let result = self.run(action, options).await;
        if let Err(err) = &result {
            error!("Action '{}' failed: {err}", action.label);
        }
        self.tray.refresh();
        result
    }

    async fn run(
        &self,
        action: &WorkAction,
        options: TransitionOptions,
    ) -> Result<StateChange, DispatchError> {
        let Some(credentials) = self.credentials.get_credentials() else {
            self.scheduler.schedule_notification(
                CREDENTIALS_MISSING_ID,
                "Login Failed",
                "Please set your credentials in the settings.",
                0,
                true,
            );
            return Err(DispatchError::MissingCredentials);
        };

        // Reject before touching the portal; the lock is not held across the await.
        {
            let machine = lock_machine(&self.machine);
            if !machine
                .available_actions()
                .iter()
                .any(|candidate| candidate.same_edge(action))
            {
                return Err(InvalidActionError {
                    label: action.label.clone(),
                    state: machine.state(),
                }
                .into());
            }
        }

        info!(
            "Performing '{}' via button {}{}",
            action.label,
            action.button_id,
            if options.dry_run { " (dry run)" } else { "" }
        );
        let request = PortalRequest {
            button_id: action.button_id.clone(),
            button_text: action.button_text.clone(),
            dry_run: options.dry_run,
            credentials,
        };
        self.portal.execute(&request).await?;

        let now = self.clock.now();
        let change = lock_machine(&self.machine).transition(action, now, options)?;
        Ok(change)
    }
}
