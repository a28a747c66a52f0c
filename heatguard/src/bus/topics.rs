//! Topic names and their delivery guarantees.

use super::QoS;

pub const ROOM_TEMPERATURE: &str = "device/room/temperature";
pub const PRINTER_TEMPERATURE_FILTER: &str = "device/printer/+/temperature";
pub const FAN_EMERGENCY: &str = "device/fan/controller/emergency";
pub const FAN_STATUS: &str = "device/fan/controller/status";

pub const ROOM_TEMPERATURE_QOS: QoS = QoS::AtMostOnce;
pub const PRINTER_TEMPERATURE_QOS: QoS = QoS::AtLeastOnce;
pub const FAN_EMERGENCY_QOS: QoS = QoS::ExactlyOnce;
pub const FAN_STATUS_QOS: QoS = QoS::AtMostOnce;
pub const FAN_SPEED_QOS: QoS = QoS::AtMostOnce;

pub fn printer_temperature(printer_id: &str) -> String {
    format!("device/printer/{printer_id}/temperature")
}

pub fn fan_speed(fan_id: &str) -> String {
    format!("device/fan/{fan_id}/speed")
}

/// Inbound topics understood by heatguard processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic<'a> {
    RoomTemperature,
    PrinterTemperature { printer_id: &'a str },
    FanStatus,
    FanEmergency,
}

pub fn classify(topic: &str) -> Option<Topic<'_>> {
    match topic {
        ROOM_TEMPERATURE => return Some(Topic::RoomTemperature),
        FAN_STATUS => return Some(Topic::FanStatus),
        FAN_EMERGENCY => return Some(Topic::FanEmergency),
        _ => {}
    }

    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["device", "printer", id, "temperature"] if !id.is_empty() => {
            Some(Topic::PrinterTemperature { printer_id: *id })
        }
        _ => None,
    }
}
