pub mod clock;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod portal;
pub mod runtime;
pub mod tray;
pub mod utils;
pub mod work;

use anyhow::Context;
use log::{error, warn};

use credentials::CredentialStore;
use runtime::{App, Collaborators};

pub fn run() -> anyhow::Result<()> {
    utils::logging::init();
    log::info!("Work time tracker starting up...");

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async {
        let data_dir = config::data_dir()?;
        let mut app = App::build(&data_dir, Collaborators::headless())?;

        if app.credentials.get_credentials().is_none() {
            warn!(
                "No portal credentials found at {}",
                app.credentials.path().display()
            );
        }

        app.start();

        let cancel = app.cancel_token();
        tokio::select! {
            _ = cancel.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!("Failed to listen for Ctrl-C: {err}");
                }
            }
        }

        app.shutdown().await;
        Ok(())
    })
}
