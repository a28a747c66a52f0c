//! MQTT transport.
//!
//! [`MqttBus::spawn`] starts the client event loop on its own task. Inbound
//! publishes are forwarded, in arrival order, to a channel the owning
//! process drains one message at a time. The returned [`MqttBus`] is the
//! [`Publisher`] half.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, Publisher, QoS};
use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;

const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Delay between reconnect attempts.
///
/// rumqttc reconnects on the next `poll` after an error with no pause of
/// its own, so the loop sleeps for `next_delay()` before polling again.
/// The nominal delay is `base * 2^failures`, capped at `cap`, then scaled
/// into [0.5, 1.0) so every sensor node does not hit a restarted broker at
/// once.
struct ReconnectBackoff {
    base: Duration,
    cap: Duration,
    failures: u32,
    jitter: RandomState,
}

impl ReconnectBackoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: 0,
            jitter: RandomState::new(),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        let nominal = self.base.saturating_mul(factor).min(self.cap);
        self.failures = self.failures.saturating_add(1);

        let mut hasher = self.jitter.build_hasher();
        hasher.write_u32(self.failures);
        let unit = hasher.finish() as f64 / u64::MAX as f64;

        nominal.mul_f64(0.5 + unit * 0.5)
    }

    /// Connected again; the next failure starts from `base`.
    fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Publisher half of an MQTT connection.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Connect to the broker in `config` and start the event loop.
    ///
    /// `subscriptions` are (re)issued on every connection acknowledgement,
    /// so they survive reconnects. The loop stops when `shutdown` fires or
    /// once a [`MqttBus::disconnect`] has gone out.
    pub fn spawn(
        config: &BusConfig,
        default_client_id: &str,
        subscriptions: Vec<(String, QoS)>,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<InboundMessage>, JoinHandle<()>) {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| default_client_id.to_string());

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        info!(host = %config.host, port = config.port, "Connecting to MQTT broker");

        let handle = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            subscriptions,
            inbound_tx,
            shutdown,
        ));

        (Self { client }, inbound_rx, handle)
    }

    /// Send a DISCONNECT so the broker drops the session cleanly.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}

#[async_trait]
impl Publisher for MqttBus {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()> {
        self.client
            .publish_bytes(topic, qos.into(), false, payload)
            .await
            .map_err(|e| Error::Transport(format!("publish to {topic} failed: {e}")))
    }
}

/// Hand one inbound message to the owning process without waiting.
///
/// The event loop must keep polling while the consumer is busy, because the
/// consumer's own publishes only drain when it does. A full channel drops
/// the message. Returns `false` once the consumer has gone away.
fn forward(inbound_tx: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> bool {
    match inbound_tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!(topic = %message.topic, "Inbound queue full, message dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<(String, QoS)>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    shutdown: CancellationToken,
) {
    let mut backoff = ReconnectBackoff::new(RECONNECT_INITIAL, RECONNECT_MAX);

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                backoff.reset();
                for (filter, qos) in &subscriptions {
                    // try_subscribe queues without awaiting the loop we are running.
                    if let Err(e) = client.try_subscribe(filter.clone(), (*qos).into()) {
                        warn!(filter = %filter, error = %e, "Subscribe failed");
                    } else {
                        debug!(filter = %filter, "Subscribed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if !forward(&inbound_tx, message) {
                    debug!("Inbound channel closed, stopping MQTT loop");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "MQTT connection error");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    trace!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_step() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(60));

        for nominal in [1, 2, 4, 8] {
            let delay = backoff.next_delay();
            let nominal = Duration::from_secs(nominal);
            assert!(delay >= nominal / 2 && delay <= nominal, "{delay:?} vs {nominal:?}");
        }
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert!(backoff.next_delay() <= Duration::from_secs(4));
    }

    #[test]
    fn backoff_reset_restores_initial() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_secs(1));
    }

    fn inbound(topic: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn forward_drops_when_consumer_is_behind() {
        let (tx, mut rx) = mpsc::channel(1);

        assert!(forward(&tx, inbound("first")));
        assert!(forward(&tx, inbound("second")));

        assert_eq!(rx.try_recv().unwrap().topic, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forward_reports_closed_consumer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        assert!(!forward(&tx, inbound("late")));
    }

    #[test]
    fn qos_maps_onto_mqtt_levels() {
        assert_eq!(rumqttc::QoS::from(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(rumqttc::QoS::from(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(rumqttc::QoS::from(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }
}
