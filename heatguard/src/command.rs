//! Emergency command payloads (`device/fan/controller/emergency`).
//!
//! The detector emits `emergency` and `resolve` actions for `overheat` and
//! `thermal_runaway`. Other publishers on the same topic use `solved` types
//! and a `shutdown` action, and unknown strings must still decode, so both
//! enums carry an `Other` catch-all.

use serde::{Deserialize, Serialize};

use crate::alerts::AlertType;
use crate::reading::SourceKind;
use crate::types::{Timestamp, iso8601_now};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyAction {
    Emergency,
    Resolve,
    Shutdown,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    Overheat,
    ThermalRunaway,
    Solved,
    #[serde(other)]
    Other,
}

impl From<AlertType> for EmergencyType {
    fn from(alert_type: AlertType) -> Self {
        match alert_type {
            AlertType::Overheat => EmergencyType::Overheat,
            AlertType::ThermalRunaway => EmergencyType::ThermalRunaway,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyCommand {
    pub action: EmergencyAction,
    #[serde(rename = "type")]
    pub kind: EmergencyType,
    /// `room` or `printer` when sent by the detector.
    #[serde(default)]
    pub source: String,
    /// Source id (sensor or printer) the command is about.
    #[serde(default)]
    pub id: String,
    pub timestamp: Timestamp,
}

impl EmergencyCommand {
    /// Build a command stamped with the current UTC time.
    pub fn new(
        action: EmergencyAction,
        kind: EmergencyType,
        source: SourceKind,
        id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            kind,
            source: source.to_string(),
            id: id.into(),
            timestamp: Timestamp::Iso(iso8601_now()),
        }
    }

    /// Whether the command forces the fan to full speed.
    pub fn is_override(&self) -> bool {
        matches!(
            self.kind,
            EmergencyType::Overheat | EmergencyType::ThermalRunaway
        )
    }

    /// Whether the command ends `current`.
    ///
    /// A `solved` type clears any emergency. A `resolve` action clears only
    /// the emergency it names: same source, id and type.
    pub fn clears(&self, current: Option<&EmergencyCommand>) -> bool {
        if self.kind == EmergencyType::Solved {
            return true;
        }
        self.action == EmergencyAction::Resolve
            && current.is_some_and(|c| {
                c.source == self.source && c.id == self.id && c.kind == self.kind
            })
    }
}
