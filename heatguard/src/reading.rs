//! Temperature readings and their wire payloads.
//!
//! Room sensors and printers publish differently shaped JSON. Both end up as
//! a [`TemperatureReading`] tagged with its [`SourceKind`], so the rest of the
//! pipeline never inspects payload shapes.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Result;
use crate::types::Timestamp;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    Room,
    Printer,
}

/// One temperature observation from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureReading {
    pub kind: SourceKind,
    /// `sensorId` for rooms, `printerId` for printers.
    pub source_id: String,
    pub temperature: f64,
    pub unit: String,
    pub timestamp: Timestamp,
}

impl TemperatureReading {
    pub fn new(
        kind: SourceKind,
        source_id: impl Into<String>,
        temperature: f64,
        timestamp: impl Into<Timestamp>,
    ) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            temperature,
            unit: default_unit(),
            timestamp: timestamp.into(),
        }
    }

    pub fn room(sensor_id: impl Into<String>, temperature: f64, timestamp: impl Into<Timestamp>) -> Self {
        Self::new(SourceKind::Room, sensor_id, temperature, timestamp)
    }

    pub fn printer(
        printer_id: impl Into<String>,
        temperature: f64,
        timestamp: impl Into<Timestamp>,
    ) -> Self {
        Self::new(SourceKind::Printer, printer_id, temperature, timestamp)
    }

    /// Decode a `device/room/temperature` payload.
    pub fn from_room_json(payload: &[u8]) -> Result<Self> {
        let dto: RoomReadingPayload = serde_json::from_slice(payload)?;
        Ok(dto.into())
    }

    /// Decode a `device/printer/{id}/temperature` payload.
    pub fn from_printer_json(payload: &[u8]) -> Result<Self> {
        let dto: PrinterReadingPayload = serde_json::from_slice(payload)?;
        Ok(dto.into())
    }
}

fn default_unit() -> String {
    "C".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomReadingPayload {
    pub sensor_id: String,
    pub temperature: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterReadingPayload {
    pub printer_id: String,
    pub temperature: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub timestamp: Timestamp,
}

impl From<RoomReadingPayload> for TemperatureReading {
    fn from(dto: RoomReadingPayload) -> Self {
        Self {
            kind: SourceKind::Room,
            source_id: dto.sensor_id,
            temperature: dto.temperature,
            unit: dto.unit,
            timestamp: dto.timestamp,
        }
    }
}

impl From<PrinterReadingPayload> for TemperatureReading {
    fn from(dto: PrinterReadingPayload) -> Self {
        Self {
            kind: SourceKind::Printer,
            source_id: dto.printer_id,
            temperature: dto.temperature,
            unit: dto.unit,
            timestamp: dto.timestamp,
        }
    }
}
