use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::state::{FanSpeed, FanState, FanStatus};
use crate::bus::{Publisher, topics};
use crate::command::{EmergencyAction, EmergencyCommand, EmergencyType};
use crate::error::Result;
use crate::tracing::prelude::*;
use crate::types::iso8601_now;

/// Thermal-runaway override window when not configured otherwise.
pub const DEFAULT_AUTO_RECOVERY: Duration = Duration::from_secs(30);

/// Drives one fan from heat-level status and emergency commands.
///
/// Speed is recomputed from the current [`FanState`] and published while
/// the state lock is held, so speed updates reach the bus in the order the
/// state changed. A thermal-runaway emergency additionally arms a
/// single-shot recovery timer that clears the override on its own if no
/// `solved` command arrives. Cloning yields another handle to the same fan.
#[derive(Clone)]
pub struct FanController {
    inner: Arc<Inner>,
}

struct Inner {
    fan_id: String,
    publisher: Arc<dyn Publisher>,
    auto_recovery: Duration,
    state: Mutex<Guarded>,
}

struct Guarded {
    fan: FanState,
    recovery: Option<RecoveryTimer>,
    next_generation: u64,
    last_speed: Option<u8>,
}

/// Handle to the armed recovery task.
///
/// The generation identifies which arming the task belongs to; an expiry
/// whose generation no longer matches is stale and does nothing.
struct RecoveryTimer {
    generation: u64,
    cancel: CancellationToken,
}

impl Guarded {
    fn disarm(&mut self) -> bool {
        match self.recovery.take() {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

impl FanController {
    pub fn new(fan_id: impl Into<String>, publisher: Arc<dyn Publisher>, auto_recovery: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fan_id: fan_id.into(),
                publisher,
                auto_recovery,
                state: Mutex::new(Guarded {
                    fan: FanState::default(),
                    recovery: None,
                    next_generation: 0,
                    last_speed: None,
                }),
            }),
        }
    }

    pub fn fan_id(&self) -> &str {
        &self.inner.fan_id
    }

    /// Record a status report and, unless an emergency holds the fan,
    /// publish the resulting speed.
    pub async fn on_status_received(&self, status: FanStatus) {
        let mut guard = self.inner.state.lock().await;
        debug!(fan_id = %self.inner.fan_id, heat_level = status.heat_level, "Status received");
        guard.fan.latest_status = Some(status);

        if guard.fan.latest_emergency.is_some() {
            debug!(fan_id = %self.inner.fan_id, "Emergency active, status recorded without speed change");
            return;
        }

        self.inner.update_speed(&mut guard).await;
    }

    /// Apply an emergency command.
    ///
    /// `solved` clears whatever emergency is stored. A `resolve` action
    /// clears it only when source, id and type match the stored emergency;
    /// a resolve about anything else is ignored, so one source's recovery
    /// cannot release an override held for another. `overheat` holds full
    /// speed until cleared. `thermal_runaway` holds full speed
    /// and re-arms the recovery timer. Anything else is stored and the speed
    /// recomputed. Replacing the stored emergency always disarms a timer
    /// belonging to the previous one.
    pub async fn on_emergency_received(&self, command: EmergencyCommand) {
        let mut guard = self.inner.state.lock().await;
        let fan_id = &self.inner.fan_id;

        if command.clears(guard.fan.latest_emergency.as_ref()) {
            info!(fan_id = %fan_id, source_id = %command.id, "Emergency cleared, returning to status control");
            guard.disarm();
            guard.fan.latest_emergency = None;
            self.inner.update_speed(&mut guard).await;
            return;
        }
        if command.action == EmergencyAction::Resolve {
            debug!(
                fan_id = %fan_id,
                source = %command.source,
                source_id = %command.id,
                kind = ?command.kind,
                "Resolve does not match the active emergency, ignored"
            );
            return;
        }

        let kind = command.kind;
        if guard.disarm() {
            debug!(fan_id = %fan_id, "Previous recovery timer cancelled");
        }
        guard.fan.latest_emergency = Some(command);

        match kind {
            EmergencyType::Overheat => {
                warn!(fan_id = %fan_id, "Overheat emergency, fan at full speed until solved");
            }
            EmergencyType::ThermalRunaway => {
                warn!(
                    fan_id = %fan_id,
                    recovery_s = self.inner.auto_recovery.as_secs_f64(),
                    "Thermal runaway emergency, fan at full speed"
                );
                self.arm_recovery(&mut guard);
            }
            _ => {
                info!(fan_id = %fan_id, kind = ?kind, "Emergency recorded");
            }
        }

        self.inner.update_speed(&mut guard).await;
    }

    fn arm_recovery(&self, guard: &mut Guarded) {
        let generation = guard.next_generation;
        guard.next_generation += 1;

        let cancel = CancellationToken::new();
        guard.recovery = Some(RecoveryTimer {
            generation,
            cancel: cancel.clone(),
        });

        let inner = Arc::clone(&self.inner);
        let delay = inner.auto_recovery;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(fan_id = %inner.fan_id, generation, "Recovery timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    inner.expire_recovery(generation).await;
                }
            }
        });
        debug!(fan_id = %self.inner.fan_id, generation, "Recovery timer armed");
    }

    /// Last published speed, if any.
    pub async fn speed(&self) -> Option<u8> {
        self.inner.state.lock().await.last_speed
    }

    pub async fn state(&self) -> FanState {
        self.inner.state.lock().await.fan.clone()
    }

    pub async fn recovery_armed(&self) -> bool {
        self.inner.state.lock().await.recovery.is_some()
    }
}

impl Inner {
    async fn expire_recovery(&self, generation: u64) {
        let mut guard = self.state.lock().await;

        let current = guard.recovery.as_ref().map(|t| t.generation);
        if current != Some(generation) {
            // Cleared or re-armed after this timer had already elapsed.
            trace!(fan_id = %self.fan_id, generation, "Stale recovery expiry ignored");
            return;
        }

        guard.recovery = None;
        guard.fan.latest_emergency = None;
        info!(fan_id = %self.fan_id, "Thermal runaway window elapsed, returning to status control");
        self.update_speed(&mut guard).await;
    }

    async fn update_speed(&self, guard: &mut Guarded) {
        let speed = guard.fan.speed();
        guard.last_speed = Some(speed);

        match self.publish_speed(speed).await {
            Ok(()) => info!(fan_id = %self.fan_id, speed_pct = speed, "Fan speed updated"),
            Err(e) => warn!(fan_id = %self.fan_id, speed_pct = speed, error = %e, "Fan speed publish failed"),
        }
    }

    async fn publish_speed(&self, speed: u8) -> Result<()> {
        let message = FanSpeed {
            fan_id: self.fan_id.clone(),
            speed,
            actual: speed,
            timestamp: iso8601_now(),
        };
        let payload = Bytes::from(serde_json::to_vec(&message)?);
        self.publisher
            .publish(&topics::fan_speed(&self.fan_id), payload, topics::FAN_SPEED_QOS)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::types::Timestamp;

    fn create_controller() -> (FanController, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let controller = FanController::new("fan1", bus.clone(), DEFAULT_AUTO_RECOVERY);
        (controller, bus)
    }

    fn status(heat_level: f64) -> FanStatus {
        FanStatus {
            heat_level,
            timestamp: Timestamp::Epoch(0.0),
        }
    }

    fn emergency(kind: EmergencyType) -> EmergencyCommand {
        EmergencyCommand {
            action: EmergencyAction::Emergency,
            kind,
            source: "printer".into(),
            id: "p1".into(),
            timestamp: Timestamp::Epoch(0.0),
        }
    }

    fn solved() -> EmergencyCommand {
        EmergencyCommand {
            action: EmergencyAction::Other,
            kind: EmergencyType::Solved,
            source: "printer".into(),
            id: "p1".into(),
            timestamp: Timestamp::Epoch(0.0),
        }
    }

    fn speeds(bus: &MemoryBus) -> Vec<u64> {
        bus.on_topic("device/fan/fan1/speed")
            .iter()
            .map(|p| p.json()["speed"].as_u64().unwrap_or(u64::MAX))
            .collect()
    }

    #[tokio::test]
    async fn should_publish_status_derived_speed() {
        let (controller, bus) = create_controller();

        controller.on_status_received(status(5.0)).await;

        assert_eq!(speeds(&bus), vec![50]);
        let json = bus.published()[0].json();
        assert_eq!(json["fanId"], "fan1");
        assert_eq!(json["actual"], 50);
    }

    #[tokio::test]
    async fn overheat_holds_full_speed_until_solved() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(3.0)).await;

        controller.on_emergency_received(emergency(EmergencyType::Overheat)).await;
        controller.on_status_received(status(1.0)).await;
        controller.on_status_received(status(2.0)).await;

        assert_eq!(speeds(&bus), vec![30, 100]);
        assert_eq!(controller.speed().await, Some(100));
        assert_eq!(controller.state().await.latest_status, Some(status(2.0)));

        controller.on_emergency_received(solved()).await;
        assert_eq!(speeds(&bus), vec![30, 100, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn overheat_has_no_timeout() {
        let (controller, bus) = create_controller();
        controller.on_emergency_received(emergency(EmergencyType::Overheat)).await;

        tokio::time::advance(Duration::from_secs(3600)).await;
        tokio::task::yield_now().await;

        assert_eq!(speeds(&bus), vec![100]);
        assert!(!controller.recovery_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn thermal_runaway_recovers_after_timeout() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(4.0)).await;
        controller.on_emergency_received(emergency(EmergencyType::ThermalRunaway)).await;
        assert!(controller.recovery_armed().await);

        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;
        assert_eq!(speeds(&bus), vec![40, 100]);

        tokio::time::advance(Duration::from_secs(1)).await;
        bus.wait_for(3).await;

        assert_eq!(speeds(&bus), vec![40, 100, 40]);
        assert!(controller.state().await.latest_emergency.is_none());
        assert!(!controller.recovery_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_runaway_rearms_a_single_window() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(2.0)).await;
        controller.on_emergency_received(emergency(EmergencyType::ThermalRunaway)).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        controller.on_emergency_received(emergency(EmergencyType::ThermalRunaway)).await;

        // First arming would have expired here.
        tokio::time::advance(Duration::from_secs(25)).await;
        tokio::task::yield_now().await;
        assert_eq!(speeds(&bus), vec![20, 100, 100]);

        tokio::time::advance(Duration::from_secs(5)).await;
        bus.wait_for(4).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(speeds(&bus), vec![20, 100, 100, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn solved_before_expiry_cancels_timer() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(6.0)).await;
        controller.on_emergency_received(emergency(EmergencyType::ThermalRunaway)).await;
        controller.on_emergency_received(solved()).await;
        assert!(!controller.recovery_armed().await);

        // A new overheat must not be cleared by the old runaway window.
        controller.on_emergency_received(emergency(EmergencyType::Overheat)).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(speeds(&bus), vec![60, 100, 60, 100]);
        assert_eq!(controller.speed().await, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn overheat_after_runaway_disarms_recovery() {
        let (controller, bus) = create_controller();
        controller.on_emergency_received(emergency(EmergencyType::ThermalRunaway)).await;
        controller.on_emergency_received(emergency(EmergencyType::Overheat)).await;
        assert!(!controller.recovery_armed().await);

        tokio::time::advance(Duration::from_secs(45)).await;
        tokio::task::yield_now().await;

        assert_eq!(speeds(&bus), vec![100, 100]);
    }

    #[tokio::test]
    async fn resolve_action_clears_override() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(1.0)).await;
        controller.on_emergency_received(emergency(EmergencyType::Overheat)).await;

        let mut resolve = emergency(EmergencyType::Overheat);
        resolve.action = EmergencyAction::Resolve;
        controller.on_emergency_received(resolve).await;

        assert_eq!(speeds(&bus), vec![10, 100, 10]);
    }

    #[tokio::test]
    async fn resolve_for_another_source_keeps_override() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(2.0)).await;
        controller.on_emergency_received(emergency(EmergencyType::Overheat)).await;

        let mut second = emergency(EmergencyType::Overheat);
        second.id = "p2".into();
        controller.on_emergency_received(second).await;

        let mut resolve = emergency(EmergencyType::Overheat);
        resolve.action = EmergencyAction::Resolve;
        controller.on_emergency_received(resolve).await;

        assert_eq!(controller.speed().await, Some(100));
        assert_eq!(speeds(&bus), vec![20, 100, 100]);
        assert_eq!(
            controller.state().await.latest_emergency.map(|e| e.id),
            Some("p2".to_string())
        );
    }

    #[tokio::test]
    async fn resolve_without_emergency_changes_nothing() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(2.0)).await;

        let mut resolve = emergency(EmergencyType::Overheat);
        resolve.action = EmergencyAction::Resolve;
        controller.on_emergency_received(resolve).await;

        assert_eq!(speeds(&bus), vec![20]);
        assert!(controller.state().await.latest_emergency.is_none());
    }

    #[tokio::test]
    async fn shutdown_action_stops_fan_and_blocks_status() {
        let (controller, bus) = create_controller();
        controller.on_status_received(status(7.0)).await;

        let mut shutdown = emergency(EmergencyType::Other);
        shutdown.action = EmergencyAction::Shutdown;
        controller.on_emergency_received(shutdown).await;
        controller.on_status_received(status(9.0)).await;

        assert_eq!(speeds(&bus), vec![70, 0]);
    }

    #[tokio::test]
    async fn publish_failure_still_updates_state() {
        let (controller, bus) = create_controller();
        bus.set_failing(true);

        controller.on_status_received(status(5.0)).await;

        assert!(bus.published().is_empty());
        assert_eq!(controller.speed().await, Some(50));
    }
}
