//! Append-only CSV dumps of the alert ledger and temperature history.
//!
//! Both files are appended to on every dump; the header row is written only
//! when a file is new or empty. Alerts are written as a full snapshot each
//! time, history rows are drained so each reading lands once.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertStore, EmergencyAlert};
use crate::error::Result;
use crate::reading::TemperatureReading;
use crate::tracing::prelude::*;

pub const ALERTS_FILE: &str = "emergency_alerts.csv";
pub const HISTORY_FILE: &str = "temperature_history.csv";

const ALERT_COLUMNS: [&str; 7] = [
    "alert_id",
    "timestamp",
    "source",
    "source_id",
    "alert_type",
    "resolved",
    "details",
];
const HISTORY_COLUMNS: [&str; 4] = ["timestamp", "temperature", "source", "source_id"];

/// Readings received since the last dump.
#[derive(Debug, Default)]
pub struct TemperatureHistory {
    readings: Mutex<Vec<TemperatureReading>>,
}

impl TemperatureHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, reading: TemperatureReading) {
        self.readings.lock().push(reading);
    }

    /// Take every pending reading, leaving the history empty.
    pub fn drain(&self) -> Vec<TemperatureReading> {
        std::mem::take(&mut *self.readings.lock())
    }

    /// Put readings back ahead of anything added since they were drained.
    pub fn restore(&self, mut readings: Vec<TemperatureReading>) {
        let mut pending = self.readings.lock();
        readings.append(&mut pending);
        *pending = readings;
    }

    pub fn len(&self) -> usize {
        self.readings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize)]
struct AlertRow<'a> {
    alert_id: &'a str,
    timestamp: String,
    source: String,
    source_id: &'a str,
    alert_type: String,
    resolved: bool,
    details: String,
}

impl<'a> From<&'a EmergencyAlert> for AlertRow<'a> {
    fn from(alert: &'a EmergencyAlert) -> Self {
        Self {
            alert_id: &alert.alert_id,
            timestamp: alert.timestamp.to_string(),
            source: alert.source.to_string(),
            source_id: &alert.source_id,
            alert_type: alert.alert_type.to_string(),
            resolved: alert.resolved,
            details: alert.details.map(|d| d.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    timestamp: String,
    temperature: f64,
    source: String,
    source_id: &'a str,
}

impl<'a> From<&'a TemperatureReading> for HistoryRow<'a> {
    fn from(reading: &'a TemperatureReading) -> Self {
        Self {
            timestamp: reading.timestamp.to_string(),
            temperature: reading.temperature,
            source: reading.kind.to_string(),
            source_id: &reading.source_id,
        }
    }
}

/// Open `path` for appending, writing `header` first if the file is empty.
fn append_writer(path: &Path, header: &[&str]) -> Result<csv::Writer<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer.write_record(header)?;
    }
    Ok(writer)
}

/// Append one row per alert to `path`.
pub fn dump_alerts(path: &Path, alerts: &[EmergencyAlert]) -> Result<()> {
    let mut writer = append_writer(path, &ALERT_COLUMNS)?;
    for alert in alerts {
        writer.serialize(AlertRow::from(alert))?;
    }
    writer.flush()?;
    Ok(())
}

/// Append one row per reading to `path`.
pub fn dump_history(path: &Path, readings: &[TemperatureReading]) -> Result<()> {
    let mut writer = append_writer(path, &HISTORY_COLUMNS)?;
    for reading in readings {
        writer.serialize(HistoryRow::from(reading))?;
    }
    writer.flush()?;
    Ok(())
}

/// Snapshot the ledger, drain the history, and write both under `directory`.
///
/// The two files are written independently; the first error is returned.
/// If the history write fails the drained readings are restored for the
/// next dump. Empty snapshots write nothing, so no header-only files appear.
pub fn dump_all(directory: &Path, alerts: &AlertStore, history: &TemperatureHistory) -> Result<()> {
    let snapshot = alerts.snapshot();
    let readings = history.drain();

    let alerts_written = if snapshot.is_empty() {
        Ok(())
    } else {
        dump_alerts(&directory.join(ALERTS_FILE), &snapshot)
    };
    let history_written = if readings.is_empty() {
        Ok(())
    } else {
        dump_history(&directory.join(HISTORY_FILE), &readings)
    };

    if let Err(e) = &alerts_written {
        warn!(alerts = snapshot.len(), error = %e, "Alert dump failed");
    }
    if let Err(e) = &history_written {
        warn!(readings = readings.len(), error = %e, "History dump failed, readings kept");
        history.restore(readings);
    } else {
        debug!(
            directory = %directory.display(),
            alerts = snapshot.len(),
            readings = readings.len(),
            "Persistence dump written"
        );
    }

    alerts_written.and(history_written)
}

async fn dump_blocking(
    directory: PathBuf,
    alerts: Arc<AlertStore>,
    history: Arc<TemperatureHistory>,
) {
    let result =
        tokio::task::spawn_blocking(move || dump_all(&directory, &alerts, &history)).await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Persistence dump failed"),
        Err(e) => error!(error = %e, "Persistence dump task panicked"),
    }
}

/// Dump every `interval` until `shutdown` fires, then dump once more.
///
/// File I/O runs on the blocking pool, never on the runtime threads.
pub async fn run_periodic_dump(
    interval: Duration,
    directory: PathBuf,
    alerts: Arc<AlertStore>,
    history: Arc<TemperatureHistory>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    info!(
        directory = %directory.display(),
        interval_s = interval.as_secs(),
        "Periodic persistence dump started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                dump_blocking(directory.clone(), Arc::clone(&alerts), Arc::clone(&history)).await;
            }
        }
    }

    dump_blocking(directory, alerts, history).await;
    info!("Final persistence dump written");
}
