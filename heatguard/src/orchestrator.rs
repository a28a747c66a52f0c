//! Reading ingestion pipeline.
//!
//! For each reading: shift the source's slots, run the threshold check, run
//! the rate check against the previous reading, then record the reading in
//! the history. Each check either raises an alert (dispatching `emergency`
//! for a new one) or advances that check's safe run, resolving matching
//! alerts and dispatching `resolve` once the run completes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::alerts::{AlertStore, AlertType, EmergencyAlert};
use crate::analyzer::TemperatureAnalyzer;
use crate::bus::InboundMessage;
use crate::bus::topics::{self, Topic};
use crate::command::EmergencyAction;
use crate::dispatch::Dispatcher;
use crate::persistence::TemperatureHistory;
use crate::reading::{SourceKind, TemperatureReading};
use crate::tracing::prelude::*;
use crate::types::{HysteresisTracker, RunStatus};

type SourceKey = (SourceKind, String);
type CheckKey = (SourceKind, String, AlertType);

/// The last two readings seen for one source.
#[derive(Debug, Clone)]
struct ReadingSlots {
    previous: Option<TemperatureReading>,
    current: TemperatureReading,
}

pub struct Orchestrator {
    analyzer: TemperatureAnalyzer,
    alerts: Arc<AlertStore>,
    history: Arc<TemperatureHistory>,
    dispatcher: Dispatcher,
    slots: Mutex<HashMap<SourceKey, ReadingSlots>>,
    hysteresis: Mutex<HysteresisTracker<CheckKey>>,
}

impl Orchestrator {
    pub fn new(
        analyzer: TemperatureAnalyzer,
        safe_required: u32,
        alerts: Arc<AlertStore>,
        history: Arc<TemperatureHistory>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            analyzer,
            alerts,
            history,
            dispatcher,
            slots: Mutex::new(HashMap::new()),
            hysteresis: Mutex::new(HysteresisTracker::new(safe_required)),
        }
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    pub fn history(&self) -> &Arc<TemperatureHistory> {
        &self.history
    }

    /// Decode and ingest one bus message. Errors are logged, never returned.
    pub fn handle(&self, message: &InboundMessage) {
        let reading = match topics::classify(&message.topic) {
            Some(Topic::RoomTemperature) => TemperatureReading::from_room_json(&message.payload),
            Some(Topic::PrinterTemperature { printer_id }) => {
                TemperatureReading::from_printer_json(&message.payload).inspect(|reading| {
                    if reading.source_id != printer_id {
                        debug!(
                            topic_id = printer_id,
                            payload_id = %reading.source_id,
                            "Printer id differs between topic and payload"
                        );
                    }
                })
            }
            _ => {
                trace!(topic = %message.topic, "Ignoring message");
                return;
            }
        };

        match reading {
            Ok(reading) => self.ingest(reading),
            Err(e) => warn!(topic = %message.topic, error = %e, "Dropping malformed reading"),
        }
    }

    /// Run one reading through both checks and record it.
    pub fn ingest(&self, reading: TemperatureReading) {
        trace!(
            source = %reading.kind,
            source_id = %reading.source_id,
            temp_c = reading.temperature,
            "Reading received"
        );

        let slots = self.shift(&reading);

        let overheat = self.analyzer.check_threshold(&slots.current);
        self.apply(&reading, AlertType::Overheat, overheat);

        if let Some(previous) = &slots.previous {
            match self.analyzer.check_rate(previous, &slots.current) {
                Ok(runaway) => self.apply(&reading, AlertType::ThermalRunaway, runaway),
                Err(e) => warn!(
                    source = %reading.kind,
                    source_id = %reading.source_id,
                    error = %e,
                    "Rate check failed"
                ),
            }
        }

        self.history.add(reading);
    }

    /// Store `reading` as current and return a copy of the shifted slots.
    fn shift(&self, reading: &TemperatureReading) -> ReadingSlots {
        let mut slots = self.slots.lock();
        let key = (reading.kind, reading.source_id.clone());

        match slots.get_mut(&key) {
            Some(slot) => {
                let previous = std::mem::replace(&mut slot.current, reading.clone());
                slot.previous = Some(previous);
                slot.clone()
            }
            None => {
                let slot = ReadingSlots {
                    previous: None,
                    current: reading.clone(),
                };
                slots.insert(key, slot.clone());
                slot
            }
        }
    }

    /// Feed one check's verdict into the lifecycle.
    fn apply(&self, reading: &TemperatureReading, alert_type: AlertType, verdict: Option<EmergencyAlert>) {
        let key = (reading.kind, reading.source_id.clone(), alert_type);
        let status = self.hysteresis.lock().check(key, verdict.is_some());

        match verdict {
            Some(alert) => self.raise(alert),
            None if status == RunStatus::Completed => {
                self.resolve_matching(reading.kind, &reading.source_id, alert_type)
            }
            None => {}
        }
    }

    fn raise(&self, alert: EmergencyAlert) {
        let (source, source_id, alert_type) = (alert.source, alert.source_id.clone(), alert.alert_type);
        let alert_id = alert.alert_id.clone();

        if !self.alerts.add_alert(alert) {
            return;
        }

        warn!(
            alert_id = %alert_id,
            source = %source,
            source_id = %source_id,
            alert_type = %alert_type,
            "Alert raised"
        );
        self.dispatcher
            .dispatch(EmergencyAction::Emergency, alert_type.into(), source, &source_id);
    }

    fn resolve_matching(&self, source: SourceKind, source_id: &str, alert_type: AlertType) {
        let matching = self
            .alerts
            .unresolved_alerts()
            .into_iter()
            .filter(|a| a.matches(source, source_id, alert_type));

        for alert in matching {
            if self.alerts.resolve_alert(&alert.alert_id) {
                info!(
                    alert_id = %alert.alert_id,
                    source = %source,
                    source_id,
                    alert_type = %alert_type,
                    "Alert resolved after safe run"
                );
                self.dispatcher
                    .dispatch(EmergencyAction::Resolve, alert_type.into(), source, source_id);
            }
        }
    }

    /// Stop dispatching and wait for queued commands to be published.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
    }
}
