//! Process plumbing shared by the heatguard binaries.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::mqtt::MqttBus;
use crate::config::Config;
use crate::tracing::prelude::*;

/// How long to wait for the broker to see our DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Load the configuration named by `HEATGUARD_CONFIG`.
pub fn load_config() -> Result<(PathBuf, Config)> {
    let path = Config::path_from_env();
    let config = Config::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    Ok((path, config))
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
pub fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
                        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Interrupt received, shutting down");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Interrupt received, shutting down");
        }

        shutdown.cancel();
    });
}

/// Disconnect from the broker and stop its event loop.
pub async fn stop_bus(bus: &MqttBus, bus_shutdown: CancellationToken, mut event_loop: JoinHandle<()>) {
    bus.disconnect().await;

    if tokio::time::timeout(DISCONNECT_GRACE, &mut event_loop)
        .await
        .is_err()
    {
        debug!("Broker did not confirm disconnect, stopping event loop");
        bus_shutdown.cancel();
        let _ = event_loop.await;
    }
}
