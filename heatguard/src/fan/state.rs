use serde::{Deserialize, Serialize};

use crate::command::{EmergencyAction, EmergencyCommand};
use crate::types::Timestamp;

pub(super) const FAN_SPEED_MIN: f64 = 0.0;
pub(super) const FAN_SPEED_MAX: u8 = 100;

/// Speed percent per heat level step.
const SPEED_PER_HEAT_LEVEL: f64 = 10.0;

/// Heat-level report on `device/fan/controller/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanStatus {
    /// Interpreted heat level, nominally 0 to 10.
    pub heat_level: f64,
    pub timestamp: Timestamp,
}

/// Speed report on `device/fan/{fanId}/speed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanSpeed {
    pub fan_id: String,
    pub speed: u8,
    /// Measured speed. Without a tachometer this echoes `speed`.
    pub actual: u8,
    pub timestamp: String,
}

/// What the controller knows at any instant.
///
/// Both slots hold only the latest message; there is no history.
#[derive(Debug, Clone, Default)]
pub struct FanState {
    pub latest_status: Option<FanStatus>,
    pub latest_emergency: Option<EmergencyCommand>,
}

impl FanState {
    pub fn speed(&self) -> u8 {
        calculate_speed(self.latest_status.as_ref(), self.latest_emergency.as_ref())
    }
}

/// Fan speed percent for a (status, emergency) pair.
///
/// Overheat and thermal-runaway emergencies force full speed, a shutdown
/// action stops the fan, otherwise the heat level maps linearly onto
/// 0..=100. No status at all means stopped.
pub fn calculate_speed(status: Option<&FanStatus>, emergency: Option<&EmergencyCommand>) -> u8 {
    if let Some(emergency) = emergency {
        if emergency.is_override() {
            return FAN_SPEED_MAX;
        }
        if emergency.action == EmergencyAction::Shutdown {
            return 0;
        }
    }

    match status {
        Some(status) => (status.heat_level * SPEED_PER_HEAT_LEVEL)
            .clamp(FAN_SPEED_MIN, FAN_SPEED_MAX as f64)
            .round() as u8,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::EmergencyType;
    use test_case::test_case;

    fn status(heat_level: f64) -> FanStatus {
        FanStatus {
            heat_level,
            timestamp: Timestamp::Epoch(0.0),
        }
    }

    fn emergency(action: EmergencyAction, kind: EmergencyType) -> EmergencyCommand {
        EmergencyCommand {
            action,
            kind,
            source: "printer".into(),
            id: "p1".into(),
            timestamp: Timestamp::Epoch(0.0),
        }
    }

    #[test_case(5.0, 50 ; "mid level")]
    #[test_case(0.0, 0 ; "zero")]
    #[test_case(12.0, 100 ; "clamped high")]
    #[test_case(-3.0, 0 ; "clamped low")]
    #[test_case(f64::NAN, 0 ; "nan is stopped")]
    fn should_map_heat_level_to_speed(level: f64, expected: u8) {
        assert_eq!(calculate_speed(Some(&status(level)), None), expected);
    }

    #[test]
    fn should_stop_without_status() {
        assert_eq!(calculate_speed(None, None), 0);
    }

    #[test_case(EmergencyType::Overheat ; "overheat")]
    #[test_case(EmergencyType::ThermalRunaway ; "thermal runaway")]
    fn override_types_force_full_speed(kind: EmergencyType) {
        let cmd = emergency(EmergencyAction::Emergency, kind);
        assert_eq!(calculate_speed(Some(&status(1.0)), Some(&cmd)), 100);
        assert_eq!(calculate_speed(None, Some(&cmd)), 100);
    }

    #[test]
    fn shutdown_action_stops_fan() {
        let cmd = emergency(EmergencyAction::Shutdown, EmergencyType::Other);
        assert_eq!(calculate_speed(Some(&status(9.0)), Some(&cmd)), 0);
    }

    #[test]
    fn override_wins_over_shutdown() {
        let cmd = emergency(EmergencyAction::Shutdown, EmergencyType::Overheat);
        assert_eq!(calculate_speed(Some(&status(2.0)), Some(&cmd)), 100);
    }

    #[test]
    fn unknown_emergency_falls_back_to_status() {
        let cmd = emergency(EmergencyAction::Other, EmergencyType::Other);
        assert_eq!(calculate_speed(Some(&status(4.0)), Some(&cmd)), 40);
    }

    #[test]
    fn should_decode_status_payload() {
        let status: FanStatus =
            serde_json::from_str(r#"{"heatLevel":5,"timestamp":"2025-07-19T12:00:00Z"}"#).unwrap();
        assert_eq!(status.heat_level, 5.0);
    }
}
