//! Fan-controller daemon.
//!
//! Subscribes to fan status and emergency commands and publishes a speed
//! for every configured fan. Thermal-runaway overrides clear themselves
//! after `fan.auto_recovery_secs` if no `solved` command arrives.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use heatguard::bus::mqtt::MqttBus;
use heatguard::bus::{Publisher, topics};
use heatguard::daemon;
use heatguard::fan::FanBank;
use heatguard::tracing::{init_journald_or_stdout, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    init_journald_or_stdout();

    let (path, config) = daemon::load_config()?;
    info!(
        config = %path.display(),
        fans = ?config.fan.fans,
        "Starting heatguard fan controller"
    );

    let shutdown = CancellationToken::new();
    let bus_shutdown = CancellationToken::new();
    daemon::cancel_on_signal(shutdown.clone());

    let subscriptions = vec![
        (topics::FAN_STATUS.to_string(), topics::FAN_STATUS_QOS),
        (topics::FAN_EMERGENCY.to_string(), topics::FAN_EMERGENCY_QOS),
    ];
    let (bus, mut inbound, event_loop) = MqttBus::spawn(
        &config.bus,
        "heatguard-fan-controller",
        subscriptions,
        bus_shutdown.clone(),
    );
    let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());

    let fans = FanBank::new(
        config.fan.fans.iter().cloned(),
        publisher,
        config.fan.auto_recovery(),
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => fans.handle(&message).await,
                None => {
                    warn!("Bus event loop ended");
                    break;
                }
            },
        }
    }

    daemon::stop_bus(&bus, bus_shutdown, event_loop).await;

    info!("Heatguard fan controller stopped");
    Ok(())
}
