//! Threshold and rate-of-change checks.
//!
//! The analyzer is stateless: each call looks only at its arguments and the
//! thresholds fixed at construction. It never performs I/O. Deduplication
//! and resolution live in [`crate::alerts`] and [`crate::orchestrator`].

use crate::alerts::{AlertDetails, AlertType, EmergencyAlert};
use crate::config::Thresholds;
use crate::error::{Error, Result};
use crate::reading::TemperatureReading;
use crate::tracing::prelude::*;

const SECONDS_PER_MINUTE: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct TemperatureAnalyzer {
    thresholds: Thresholds,
}

impl TemperatureAnalyzer {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Overheat alert iff the reading is strictly above its kind's `high`.
    pub fn check_threshold(&self, reading: &TemperatureReading) -> Option<EmergencyAlert> {
        let high = self.thresholds.for_kind(reading.kind).high;

        if reading.temperature <= high {
            trace!(
                source = %reading.kind,
                source_id = %reading.source_id,
                temp_c = reading.temperature,
                high_c = high,
                "Threshold check passed"
            );
            return None;
        }

        debug!(
            source = %reading.kind,
            source_id = %reading.source_id,
            temp_c = reading.temperature,
            high_c = high,
            "Threshold exceeded"
        );

        Some(EmergencyAlert {
            alert_id: format!("{}_{}_{}", reading.kind, reading.source_id, reading.timestamp),
            source: reading.kind,
            source_id: reading.source_id.clone(),
            alert_type: AlertType::Overheat,
            timestamp: reading.timestamp.clone(),
            resolved: false,
            details: Some(AlertDetails::Temperature(reading.temperature)),
        })
    }

    /// Thermal-runaway alert iff the temperature rose faster than the kind's
    /// per-minute limit between two consecutive readings.
    ///
    /// Both readings must come from the same source; anything else is an
    /// [`Error::InvalidInput`]. A falling or flat temperature never alerts.
    /// Identical timestamps make the rate infinite.
    pub fn check_rate(
        &self,
        prev: &TemperatureReading,
        curr: &TemperatureReading,
    ) -> Result<Option<EmergencyAlert>> {
        if prev.kind != curr.kind || prev.source_id != curr.source_id {
            return Err(Error::InvalidInput(format!(
                "rate check across sources: {}/{} vs {}/{}",
                prev.kind, prev.source_id, curr.kind, curr.source_id
            )));
        }

        let delta_temp = curr.temperature - prev.temperature;
        if delta_temp <= 0.0 {
            trace!(
                source = %curr.kind,
                source_id = %curr.source_id,
                delta_c = delta_temp,
                "Rate check skipped, temperature not rising"
            );
            return Ok(None);
        }

        let elapsed_s = prev.timestamp.seconds_between(&curr.timestamp)?;
        let rate_per_minute = if elapsed_s > 0.0 {
            delta_temp / elapsed_s * SECONDS_PER_MINUTE
        } else {
            f64::INFINITY
        };
        let max_rate = self.thresholds.for_kind(curr.kind).max_rate_per_minute;

        debug!(
            source = %curr.kind,
            source_id = %curr.source_id,
            delta_c = delta_temp,
            elapsed_s,
            rate_per_min = rate_per_minute,
            max_rate_per_min = max_rate,
            "Rate computed"
        );

        if rate_per_minute <= max_rate {
            return Ok(None);
        }

        Ok(Some(EmergencyAlert {
            alert_id: format!("rate_{}_{}_{}", curr.kind, curr.source_id, curr.timestamp),
            source: curr.kind,
            source_id: curr.source_id.clone(),
            alert_type: AlertType::ThermalRunaway,
            timestamp: curr.timestamp.clone(),
            resolved: false,
            details: Some(AlertDetails::RatePerMinute(rate_per_minute)),
        }))
    }
}
