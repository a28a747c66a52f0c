//! Message-bus seam.
//!
//! Components publish through the [`Publisher`] trait and never see the
//! transport. [`mqtt::MqttBus`] is the production implementation;
//! [`memory::MemoryBus`] records traffic for tests.

pub mod memory;
pub mod mqtt;
pub mod topics;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Outbound side of the bus.
///
/// Implementations report failures as [`crate::error::Error::Transport`].
/// Callers log and drop; nothing here retries.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()>;
}

/// A message delivered by the bus.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}
