//! Detector to fan controller, wired through an in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use heatguard::alerts::AlertStore;
use heatguard::analyzer::TemperatureAnalyzer;
use heatguard::bus::memory::MemoryBus;
use heatguard::bus::{InboundMessage, topics};
use heatguard::config::Config;
use heatguard::dispatch::Dispatcher;
use heatguard::fan::FanBank;
use heatguard::orchestrator::Orchestrator;
use heatguard::persistence::TemperatureHistory;

const CONFIG: &str = r#"
    [room]
    high = 50

    [printer]
    high = 300
    maxRatePerMinute = 100

    [dispatch]
    workers = 2
"#;

fn printer_reading(temperature: f64, timestamp: &str) -> InboundMessage {
    let payload = serde_json::json!({
        "printerId": "printer-1",
        "temperature": temperature,
        "unit": "C",
        "timestamp": timestamp,
    });
    InboundMessage {
        topic: topics::printer_temperature("printer-1"),
        payload: Bytes::from(payload.to_string()),
    }
}

fn detector(config: &Config, bus: Arc<MemoryBus>) -> Orchestrator {
    Orchestrator::new(
        TemperatureAnalyzer::new(config.thresholds),
        config.hysteresis.safe_required,
        Arc::new(AlertStore::new()),
        Arc::new(TemperatureHistory::new()),
        Dispatcher::spawn(bus, &config.dispatch),
    )
}

#[tokio::test]
async fn printer_overheat_episode_dispatches_emergency_then_resolve() {
    let config = Config::from_toml_str(CONFIG).unwrap();
    let bus = Arc::new(MemoryBus::new());
    let orchestrator = detector(&config, bus.clone());

    for (temperature, timestamp) in [
        (250.0, "2025-07-19T12:00:00Z"),
        (310.0, "2025-07-19T12:01:00Z"),
        (300.0, "2025-07-19T12:02:00Z"),
        (295.0, "2025-07-19T12:03:00Z"),
        (290.0, "2025-07-19T12:04:00Z"),
    ] {
        orchestrator.handle(&printer_reading(temperature, timestamp));
    }

    let history = Arc::clone(orchestrator.history());
    orchestrator.shutdown().await;

    let commands: Vec<_> = bus
        .on_topic(topics::FAN_EMERGENCY)
        .iter()
        .map(|p| p.json())
        .collect();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0]["action"], "emergency");
    assert_eq!(commands[0]["type"], "overheat");
    assert_eq!(commands[0]["source"], "printer");
    assert_eq!(commands[0]["id"], "printer-1");
    assert_eq!(commands[1]["action"], "resolve");
    assert_eq!(commands[1]["type"], "overheat");
    assert_eq!(history.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn detector_commands_drive_the_fan() {
    let config = Config::from_toml_str(CONFIG).unwrap();
    let detector_bus = Arc::new(MemoryBus::new());
    let fan_bus = Arc::new(MemoryBus::new());
    let orchestrator = detector(&config, detector_bus.clone());
    let fans = FanBank::new(
        config.fan.fans.iter().cloned(),
        fan_bus.clone(),
        config.fan.auto_recovery(),
    );

    fans.handle(&InboundMessage {
        topic: topics::FAN_STATUS.to_string(),
        payload: Bytes::from_static(br#"{"heatLevel": 3, "timestamp": "2025-07-19T12:00:00Z"}"#),
    })
    .await;

    // 60 degrees in 30 seconds: thermal runaway, no overheat.
    orchestrator.handle(&printer_reading(200.0, "2025-07-19T12:00:00Z"));
    orchestrator.handle(&printer_reading(260.0, "2025-07-19T12:00:30Z"));
    orchestrator.shutdown().await;

    for command in detector_bus.on_topic(topics::FAN_EMERGENCY) {
        fans.handle(&InboundMessage {
            topic: command.topic,
            payload: command.payload,
        })
        .await;
    }

    let fan = fans.get("fan1").unwrap();
    assert_eq!(fan.speed().await, Some(100));

    tokio::time::advance(Duration::from_secs(30)).await;
    fan_bus.wait_for(3).await;

    let speeds: Vec<_> = fan_bus
        .on_topic(&topics::fan_speed("fan1"))
        .iter()
        .map(|p| p.json()["speed"].clone())
        .collect();
    assert_eq!(speeds, vec![30, 100, 30]);
}
