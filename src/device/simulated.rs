//! In-process media player for development and testing.
//!
//! Power commands are recorded and, unless disabled, echoed back as
//! `update:powerState` events the way a real player confirms them.

use super::{
    DeviceError, DeviceEvent, DeviceHandle, DeviceParams, EventHub, POWER_STATE, PowerState,
    Subscription, ValueChange, update_event,
};
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

pub struct SimulatedDevice {
    params: DeviceParams,
    hub: EventHub,
    values: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<PowerState>>,
    fail_commands: AtomicBool,
    echo_power: AtomicBool,
}

impl SimulatedDevice {
    pub fn new(params: DeviceParams) -> Self {
        Self {
            params,
            hub: EventHub::new(),
            values: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            fail_commands: AtomicBool::new(false),
            echo_power: AtomicBool::new(true),
        }
    }

    /// Whether power commands emit a confirming `update:powerState` event.
    pub fn with_power_echo(self, echo: bool) -> Self {
        self.echo_power.store(echo, Ordering::SeqCst);
        self
    }

    /// Make subsequent power commands fail.
    pub fn set_fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Report a new value for a property, tracking the previous one.
    pub fn emit(&self, property: &str, value: &str) {
        let old_value = self
            .values
            .lock()
            .insert(property.to_string(), value.to_string());
        self.hub.emit(
            &update_event(property),
            DeviceEvent::Update(ValueChange::new(old_value, value)),
        );
    }

    /// Deliver a failure on a single property's subscription.
    pub fn fail(&self, property: &str, error: DeviceError) {
        self.hub
            .emit(&update_event(property), DeviceEvent::Failed(error));
    }

    /// Last value reported for a property.
    pub fn value(&self, property: &str) -> Option<String> {
        self.values.lock().get(property).cloned()
    }

    /// Power commands received so far, oldest first.
    pub fn commands(&self) -> Vec<PowerState> {
        self.commands.lock().clone()
    }

    pub fn subscriber_count(&self, property: &str) -> usize {
        self.hub.subscriber_count(&update_event(property))
    }

    fn power(&self, state: PowerState) -> Result<(), DeviceError> {
        let command = match state {
            PowerState::On => "turn_on",
            PowerState::Off => "turn_off",
        };
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(DeviceError::CommandFailed {
                command,
                reason: "simulated failure".to_string(),
            });
        }
        self.commands.lock().push(state);
        if self.echo_power.load(Ordering::SeqCst) {
            self.emit(POWER_STATE, state.as_ref());
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceHandle for SimulatedDevice {
    fn id(&self) -> Option<String> {
        Some(format!("SIM-{}", self.params.host))
    }

    async fn turn_on(&self) -> Result<(), DeviceError> {
        tokio::task::yield_now().await;
        self.power(PowerState::On)
    }

    async fn turn_off(&self) -> Result<(), DeviceError> {
        tokio::task::yield_now().await;
        self.power(PowerState::Off)
    }

    fn subscribe(&self, event_name: &str) -> Subscription {
        self.hub.subscribe(event_name)
    }
}

/// Spawn a task that periodically reports a random value for each property.
///
/// Useful for exercising sensor services without a real player.
///
/// # Returns
///
/// A `JoinHandle` that can be used to abort the simulation task.
pub fn run_simulation(
    device: Arc<SimulatedDevice>,
    properties: Vec<(String, Vec<String>)>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        loop {
            interval.tick().await;
            for (property, values) in &properties {
                let choice = values.choose(&mut rand::thread_rng()).cloned();
                if let Some(value) = choice {
                    info!("[Sim] {} -> {}", property, value);
                    device.emit(property, &value);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(DeviceParams {
            name: "Living Room".into(),
            host: "10.0.0.20".into(),
            credentials: None,
        })
    }

    #[test]
    fn test_emit_tracks_old_value() {
        let device = device();
        let mut sub = device.subscribe("update:deviceState");

        device.emit("deviceState", "playing");
        device.emit("deviceState", "paused");

        assert_eq!(
            sub.try_recv(),
            Some(DeviceEvent::Update(ValueChange::new(None, "playing")))
        );
        assert_eq!(
            sub.try_recv(),
            Some(DeviceEvent::Update(ValueChange::new(
                Some("playing".into()),
                "paused"
            )))
        );
        assert_eq!(device.value("deviceState").as_deref(), Some("paused"));
    }

    #[tokio::test]
    async fn test_power_commands_echo_state() {
        let device = device();
        let mut sub = device.subscribe("update:powerState");

        device.turn_on().await.unwrap();
        device.turn_off().await.unwrap();

        assert_eq!(device.commands(), vec![PowerState::On, PowerState::Off]);
        assert_eq!(
            sub.try_recv(),
            Some(DeviceEvent::Update(ValueChange::new(None, "on")))
        );
        assert_eq!(
            sub.try_recv(),
            Some(DeviceEvent::Update(ValueChange::new(Some("on".into()), "off")))
        );
    }

    #[tokio::test]
    async fn test_power_echo_can_be_disabled() {
        let device = device().with_power_echo(false);
        let mut sub = device.subscribe("update:powerState");

        device.turn_on().await.unwrap();

        assert_eq!(device.commands(), vec![PowerState::On]);
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_failing_commands() {
        let device = device();
        device.set_fail_commands(true);

        let err = device.turn_off().await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::CommandFailed {
                command: "turn_off",
                ..
            }
        ));
        assert!(device.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_reports_configured_values() {
        let device = Arc::new(device());
        let mut state = device.subscribe("update:deviceState");
        let mut app = device.subscribe("update:app");
        let states = vec!["playing".to_string(), "paused".to_string()];
        let apps = vec!["com.netflix.Netflix".to_string()];

        let simulation = run_simulation(
            device.clone(),
            vec![
                ("deviceState".to_string(), states.clone()),
                ("app".to_string(), apps.clone()),
            ],
            Duration::from_secs(10),
        );
        tokio::time::sleep(Duration::from_secs(11)).await;

        // First tick is immediate, second after one period
        for _ in 0..2 {
            match state.try_recv() {
                Some(DeviceEvent::Update(change)) => assert!(states.contains(&change.new_value)),
                other => panic!("unexpected deviceState event: {:?}", other),
            }
            match app.try_recv() {
                Some(DeviceEvent::Update(change)) => assert!(apps.contains(&change.new_value)),
                other => panic!("unexpected app event: {:?}", other),
            }
        }

        simulation.abort();
        let _ = simulation.await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(state.try_recv(), None);
        assert_eq!(app.try_recv(), None);
    }

    #[test]
    fn test_fail_reaches_only_that_property() {
        let device = device();
        let mut power = device.subscribe("update:powerState");
        let mut state = device.subscribe("update:deviceState");

        device.fail("powerState", DeviceError::Reported("lost".into()));

        assert_eq!(
            power.try_recv(),
            Some(DeviceEvent::Failed(DeviceError::Reported("lost".into())))
        );
        assert_eq!(state.try_recv(), None);
    }
}
