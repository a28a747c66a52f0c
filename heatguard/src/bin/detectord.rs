//! Anomaly-detector daemon.
//!
//! Subscribes to room and printer temperature topics, raises and resolves
//! alerts, publishes emergency commands for the fan controller, and dumps
//! alerts and readings to CSV on an interval.
//!
//! Configuration comes from the TOML file named by `HEATGUARD_CONFIG`
//! (default `heatguard.toml`). Log filtering follows `RUST_LOG`.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use heatguard::alerts::AlertStore;
use heatguard::analyzer::TemperatureAnalyzer;
use heatguard::bus::mqtt::MqttBus;
use heatguard::bus::{Publisher, topics};
use heatguard::daemon;
use heatguard::dispatch::Dispatcher;
use heatguard::orchestrator::Orchestrator;
use heatguard::persistence::{self, TemperatureHistory};
use heatguard::tracing::{init_journald_or_stdout, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    init_journald_or_stdout();

    let (path, config) = daemon::load_config()?;
    info!(config = %path.display(), "Starting heatguard detector");

    let shutdown = CancellationToken::new();
    let bus_shutdown = CancellationToken::new();
    daemon::cancel_on_signal(shutdown.clone());

    let subscriptions = vec![
        (topics::ROOM_TEMPERATURE.to_string(), topics::ROOM_TEMPERATURE_QOS),
        (
            topics::PRINTER_TEMPERATURE_FILTER.to_string(),
            topics::PRINTER_TEMPERATURE_QOS,
        ),
    ];
    let (bus, mut inbound, event_loop) = MqttBus::spawn(
        &config.bus,
        "heatguard-detector",
        subscriptions,
        bus_shutdown.clone(),
    );
    let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());

    let alerts = Arc::new(AlertStore::new());
    let history = Arc::new(TemperatureHistory::new());
    let orchestrator = Orchestrator::new(
        TemperatureAnalyzer::new(config.thresholds),
        config.hysteresis.safe_required,
        Arc::clone(&alerts),
        Arc::clone(&history),
        Dispatcher::spawn(publisher, &config.dispatch),
    );

    let tracker = TaskTracker::new();
    tracker.spawn(persistence::run_periodic_dump(
        config.persistence.dump_interval(),
        config.persistence.directory.clone(),
        alerts,
        history,
        shutdown.clone(),
    ));
    tracker.close();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => orchestrator.handle(&message),
                None => {
                    warn!("Bus event loop ended");
                    shutdown.cancel();
                    break;
                }
            },
        }
    }

    orchestrator.shutdown().await;
    tracker.wait().await;
    daemon::stop_bus(&bus, bus_shutdown, event_loop).await;

    info!("Heatguard detector stopped");
    Ok(())
}
