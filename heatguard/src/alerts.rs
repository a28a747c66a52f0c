//! Alert lifecycle.
//!
//! [`AlertStore`] is an append-only ledger of [`EmergencyAlert`]s. At most
//! one unresolved alert exists per dedup triple (source kind, source id,
//! alert type); resolved alerts stay in the ledger as history.
//!
//! The store is shared by the ingestion path, the command dispatcher and
//! the periodic dump, so every operation runs under one short critical
//! section. Callers that need to iterate take a snapshot.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::reading::SourceKind;
use crate::tracing::prelude::*;
use crate::types::Timestamp;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    /// Temperature above the source's `high` threshold.
    Overheat,
    /// Rate of increase above the source's per-minute limit.
    ThermalRunaway,
}

/// What the analyzer measured when it raised the alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertDetails {
    Temperature(f64),
    RatePerMinute(f64),
}

impl fmt::Display for AlertDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertDetails::Temperature(t) => write!(f, "temperature: {}", t),
            AlertDetails::RatePerMinute(r) => write!(f, "rate per minute: {}", r),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyAlert {
    pub alert_id: String,
    pub source: SourceKind,
    pub source_id: String,
    pub alert_type: AlertType,
    pub timestamp: Timestamp,
    pub resolved: bool,
    pub details: Option<AlertDetails>,
}

impl EmergencyAlert {
    pub fn is_active(&self) -> bool {
        !self.resolved
    }

    /// Whether `self` is unresolved and shares `other`'s dedup triple.
    pub fn is_reentrant(&self, other: &EmergencyAlert) -> bool {
        self.matches(other.source, &other.source_id, other.alert_type) && !self.resolved
    }

    pub fn matches(&self, source: SourceKind, source_id: &str, alert_type: AlertType) -> bool {
        self.source == source && self.source_id == source_id && self.alert_type == alert_type
    }
}

/// Thread-safe, append-only alert ledger.
#[derive(Debug, Default)]
pub struct AlertStore {
    alerts: Mutex<Vec<EmergencyAlert>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `alert` unless an unresolved alert with the same triple exists.
    ///
    /// Returns `false` for a suppressed duplicate; the new alert is dropped.
    /// The scan and the append happen under one lock so two concurrent
    /// violations cannot both observe "none active".
    pub fn add_alert(&self, alert: EmergencyAlert) -> bool {
        let mut alerts = self.alerts.lock();

        if let Some(existing) = alerts.iter().find(|a| a.is_reentrant(&alert)) {
            debug!(
                alert_id = %alert.alert_id,
                active_id = %existing.alert_id,
                "Duplicate active alert suppressed"
            );
            return false;
        }

        debug!(alert_id = %alert.alert_id, "Alert added");
        alerts.push(alert);
        true
    }

    /// Mark the alert with `alert_id` resolved.
    ///
    /// Returns `true` only on the unresolved-to-resolved transition. Unknown
    /// or already-resolved ids return `false`; stale ids from duplicate
    /// processing are expected.
    pub fn resolve_alert(&self, alert_id: &str) -> bool {
        let mut alerts = self.alerts.lock();

        match alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id && a.is_active())
        {
            Some(alert) => {
                alert.resolved = true;
                debug!(alert_id, "Alert resolved");
                true
            }
            None => {
                debug!(alert_id, "No active alert to resolve");
                false
            }
        }
    }

    /// Copy of every unresolved alert.
    pub fn unresolved_alerts(&self) -> Vec<EmergencyAlert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.is_active())
            .cloned()
            .collect()
    }

    /// Copy of the whole ledger, in insertion order.
    pub fn snapshot(&self) -> Vec<EmergencyAlert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
