use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::controller::FanController;
use super::state::FanStatus;
use crate::bus::topics::{self, Topic};
use crate::bus::{InboundMessage, Publisher};
use crate::command::EmergencyCommand;
use crate::error::Result;
use crate::tracing::prelude::*;

/// The fans hosted by one process, keyed by fan id.
pub struct FanBank {
    fans: BTreeMap<String, FanController>,
}

impl FanBank {
    pub fn new<I, S>(fan_ids: I, publisher: Arc<dyn Publisher>, auto_recovery: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fans = fan_ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                let controller = FanController::new(id.clone(), Arc::clone(&publisher), auto_recovery);
                (id, controller)
            })
            .collect();
        Self { fans }
    }

    pub fn get(&self, fan_id: &str) -> Option<&FanController> {
        self.fans.get(fan_id)
    }

    pub fn fan_ids(&self) -> impl Iterator<Item = &str> {
        self.fans.keys().map(String::as_str)
    }

    /// Handle one inbound bus message.
    ///
    /// Payloads that fail to parse are logged and dropped. Topics other than
    /// fan status and emergency are ignored.
    pub async fn handle(&self, message: &InboundMessage) {
        let result = match topics::classify(&message.topic) {
            Some(Topic::FanStatus) => self.handle_status(&message.payload).await,
            Some(Topic::FanEmergency) => self.handle_emergency(&message.payload).await,
            _ => {
                trace!(topic = %message.topic, "Ignoring message");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(topic = %message.topic, error = %e, "Dropping malformed fan message");
        }
    }

    async fn handle_status(&self, payload: &[u8]) -> Result<()> {
        let (target, status) = parse::<FanStatus>(payload)?;
        for fan in self.targets(target.as_deref()) {
            fan.on_status_received(status.clone()).await;
        }
        Ok(())
    }

    async fn handle_emergency(&self, payload: &[u8]) -> Result<()> {
        let (target, command) = parse::<EmergencyCommand>(payload)?;
        for fan in self.targets(target.as_deref()) {
            fan.on_emergency_received(command.clone()).await;
        }
        Ok(())
    }

    /// The addressed fan if `target` names one of ours, otherwise all fans.
    fn targets<'a>(&'a self, target: Option<&str>) -> Vec<&'a FanController> {
        match target.and_then(|id| self.fans.get(id)) {
            Some(fan) => vec![fan],
            None => self.fans.values().collect(),
        }
    }
}

/// Decode a payload and pull out the fan it addresses, if it names one.
fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<(Option<String>, T)> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let target = ["fanId", "id"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_owned);
    let message = serde_json::from_value(value)?;
    Ok((target, message))
}
