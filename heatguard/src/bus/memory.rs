//! In-process bus that records every publish.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Publisher, QoS};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Records publishes in order. Can be switched to fail every publish.
#[derive(Debug)]
pub struct MemoryBus {
    published: Mutex<Vec<Published>>,
    count_tx: watch::Sender<usize>,
    failing: AtomicBool,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            published: Mutex::new(Vec::new()),
            count_tx,
            failing: AtomicBool::new(false),
        }
    }

    /// Make subsequent publishes fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Published> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` messages have been published.
    pub async fn wait_for(&self, count: usize) {
        let mut rx = self.count_tx.subscribe();
        // Sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

#[async_trait]
impl Publisher for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("memory bus refused {topic}")));
        }

        let count = {
            let mut published = self.published.lock();
            published.push(Published {
                topic: topic.to_string(),
                payload,
                qos,
            });
            published.len()
        };
        self.count_tx.send_replace(count);
        Ok(())
    }
}
