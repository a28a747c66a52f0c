//! Emergency command dispatch.
//!
//! [`Dispatcher::dispatch`] never blocks the caller. Commands go onto one of
//! a fixed set of bounded queues, each drained by its own publisher task.
//! The queue is picked by hashing the command's source, so commands about
//! one source are published in the order they were dispatched. A full
//! queue drops the command with a warning; a failed publish is logged and
//! dropped. Retrying is left to the transport.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::bus::{Publisher, topics};
use crate::command::{EmergencyAction, EmergencyCommand, EmergencyType};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::reading::SourceKind;
use crate::tracing::prelude::*;

pub struct Dispatcher {
    queues: Vec<mpsc::Sender<EmergencyCommand>>,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Start `config.workers` publisher tasks on the current runtime.
    pub fn spawn(publisher: Arc<dyn Publisher>, config: &DispatchConfig) -> Self {
        let tracker = TaskTracker::new();
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);

        let queues = (0..workers)
            .map(|worker| {
                let (tx, rx) = mpsc::channel(capacity);
                tracker.spawn(publish_loop(worker, rx, Arc::clone(&publisher)));
                tx
            })
            .collect();

        debug!(workers, capacity, "Dispatcher started");

        Self { queues, tracker }
    }

    /// Queue one command for `source`/`id`, stamped with the current time.
    ///
    /// Returns `false` if the command was dropped because its queue is full
    /// or the dispatcher is shutting down.
    pub fn dispatch(
        &self,
        action: EmergencyAction,
        kind: EmergencyType,
        source: SourceKind,
        id: &str,
    ) -> bool {
        let command = EmergencyCommand::new(action, kind, source, id);
        let queue = &self.queues[self.queue_index(source, id)];

        info!(
            action = ?action,
            kind = ?kind,
            source = %source,
            source_id = %id,
            "Dispatching emergency command"
        );

        match queue.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn!(
                    action = ?command.action,
                    kind = ?command.kind,
                    source_id = %command.id,
                    "Dispatch queue full, command dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(source_id = %id, "Dispatcher closed, command dropped");
                false
            }
        }
    }

    fn queue_index(&self, source: SourceKind, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        id.hash(&mut hasher);
        (hasher.finish() % self.queues.len() as u64) as usize
    }

    /// Stop accepting commands and wait for queued ones to be published.
    pub async fn shutdown(self) {
        let Self { queues, tracker } = self;
        drop(queues);
        tracker.close();
        tracker.wait().await;
        debug!("Dispatcher drained");
    }
}

async fn publish_loop(
    worker: usize,
    mut rx: mpsc::Receiver<EmergencyCommand>,
    publisher: Arc<dyn Publisher>,
) {
    while let Some(command) = rx.recv().await {
        if let Err(e) = publish(publisher.as_ref(), &command).await {
            warn!(
                worker,
                action = ?command.action,
                kind = ?command.kind,
                source_id = %command.id,
                error = %e,
                "Emergency command publish failed"
            );
        }
    }
    trace!(worker, "Dispatch worker stopped");
}

async fn publish(publisher: &dyn Publisher, command: &EmergencyCommand) -> Result<()> {
    let payload = Bytes::from(serde_json::to_vec(command)?);
    publisher
        .publish(topics::FAN_EMERGENCY, payload, topics::FAN_EMERGENCY_QOS)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;

    fn config(workers: usize, queue_capacity: usize) -> DispatchConfig {
        DispatchConfig {
            workers,
            queue_capacity,
        }
    }

    #[tokio::test]
    async fn should_publish_command_on_emergency_topic() {
        let bus = Arc::new(MemoryBus::new());
        let dispatcher = Dispatcher::spawn(bus.clone(), &config(2, 8));

        assert!(dispatcher.dispatch(
            EmergencyAction::Emergency,
            EmergencyType::Overheat,
            SourceKind::Printer,
            "p1",
        ));
        dispatcher.shutdown().await;

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, topics::FAN_EMERGENCY);
        assert_eq!(published[0].qos, topics::FAN_EMERGENCY_QOS);

        let json = published[0].json();
        assert_eq!(json["action"], "emergency");
        assert_eq!(json["type"], "overheat");
        assert_eq!(json["source"], "printer");
        assert_eq!(json["id"], "p1");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn should_keep_per_source_order() {
        let bus = Arc::new(MemoryBus::new());
        let dispatcher = Dispatcher::spawn(bus.clone(), &config(4, 8));

        dispatcher.dispatch(
            EmergencyAction::Emergency,
            EmergencyType::Overheat,
            SourceKind::Room,
            "room1",
        );
        dispatcher.dispatch(
            EmergencyAction::Resolve,
            EmergencyType::Overheat,
            SourceKind::Room,
            "room1",
        );
        dispatcher.shutdown().await;

        let actions: Vec<_> = bus
            .published()
            .iter()
            .map(|p| p.json()["action"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(actions, vec!["emergency", "resolve"]);
    }

    #[tokio::test]
    async fn should_drain_queued_commands_on_shutdown() {
        let bus = Arc::new(MemoryBus::new());
        let dispatcher = Dispatcher::spawn(bus.clone(), &config(1, 16));

        for i in 0..10 {
            dispatcher.dispatch(
                EmergencyAction::Emergency,
                EmergencyType::ThermalRunaway,
                SourceKind::Printer,
                &format!("p{i}"),
            );
        }
        dispatcher.shutdown().await;

        assert_eq!(bus.published().len(), 10);
    }

    #[tokio::test]
    async fn should_drop_when_queue_full() {
        let bus = Arc::new(MemoryBus::new());
        let dispatcher = Dispatcher::spawn(bus.clone(), &config(1, 1));

        // Current-thread runtime: the worker cannot run until we yield, so
        // the second command finds the single slot taken.
        let first = dispatcher.dispatch(
            EmergencyAction::Emergency,
            EmergencyType::Overheat,
            SourceKind::Room,
            "room1",
        );
        let second = dispatcher.dispatch(
            EmergencyAction::Emergency,
            EmergencyType::Overheat,
            SourceKind::Room,
            "room2",
        );
        dispatcher.shutdown().await;

        assert!(first);
        assert!(!second);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_worker() {
        let bus = Arc::new(MemoryBus::new());
        let dispatcher = Dispatcher::spawn(bus.clone(), &config(1, 8));

        bus.set_failing(true);
        dispatcher.dispatch(
            EmergencyAction::Emergency,
            EmergencyType::Overheat,
            SourceKind::Room,
            "room1",
        );
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        bus.set_failing(false);
        dispatcher.dispatch(
            EmergencyAction::Resolve,
            EmergencyType::Overheat,
            SourceKind::Room,
            "room1",
        );
        dispatcher.shutdown().await;

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].json()["action"], "resolve");
    }
}
