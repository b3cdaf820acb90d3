//! Event routing from device subscriptions to characteristics.
//!
//! One subscription (and one task) per tracked property: `update:powerState`
//! plus `update:{property}` for every sensor group. Each task feeds its
//! events, in delivery order, to a handler that only writes characteristics
//! resolved when the router started.

use super::debounce::{Clock, Debounced};
use super::reconciler::ReconciledServices;
use crate::accessory::{Characteristic, CharacteristicType, Service};
use crate::device::{DeviceEvent, DeviceHandle, POWER_STATE, PowerState, Subscription, update_event};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

type ApplyFn = Box<dyn FnMut(String) + Send>;

/// Maps power state events to the switch's `On` characteristic.
pub struct PowerStateHandler {
    name: String,
    apply: Debounced<String, ApplyFn>,
}

impl PowerStateHandler {
    /// `delay` of `None` applies every event immediately.
    pub fn new(
        name: impl Into<String>,
        power: &Service,
        delay: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let on = power.characteristic(CharacteristicType::On);
        let label = name.clone();
        let apply: ApplyFn = Box::new(move |value: String| apply_power_state(&label, &on, &value));
        Self {
            name,
            apply: Debounced::new(delay, clock, apply),
        }
    }

    pub fn handle(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Failed(e) => {
                debug!(
                    "[Bridge] {}: Error updating power state {} {}",
                    self.name,
                    e.name(),
                    e
                );
            }
            DeviceEvent::Update(change) => self.apply.call(change.new_value),
        }
    }
}

fn apply_power_state(name: &str, on: &Characteristic, value: &str) {
    debug!("[Bridge] {}: update:powerState {}", name, value);
    on.update_value(PowerState::is_on(value));
}

/// Maps one property's events to its group of sensors.
///
/// Every event rewrites every sensor in the group, so at most one of them is
/// detected at any time.
pub struct SensorGroupHandler {
    sensors: Vec<(String, Arc<Characteristic>)>,
}

impl SensorGroupHandler {
    pub fn new(sensors: &[(String, Arc<Service>)]) -> Self {
        Self {
            sensors: sensors
                .iter()
                .map(|(value, service)| {
                    (
                        value.clone(),
                        service.characteristic(CharacteristicType::MotionDetected),
                    )
                })
                .collect(),
        }
    }

    pub fn handle(&self, event: &DeviceEvent) {
        let DeviceEvent::Update(change) = event else {
            return;
        };
        for (value, detected) in &self.sensors {
            detected.update_value(change.new_value == *value);
        }
    }
}

/// Running subscriptions of one accessory.
///
/// Dropping the handle cancels the subscriptions; `shutdown` also waits for
/// the handler tasks to finish.
pub struct RouterHandle {
    events: Vec<String>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl RouterHandle {
    /// Event names this router subscribed to, in subscription order.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.wait().await;
    }
}

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Subscribe every tracked property and start routing.
pub fn start(
    name: &str,
    device: &dyn DeviceHandle,
    services: &ReconciledServices,
    power_delay: Option<Duration>,
    clock: Arc<dyn Clock>,
) -> RouterHandle {
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let mut events = Vec::with_capacity(services.sensor_groups.len() + 1);

    let power_event = update_event(POWER_STATE);
    debug!("[Bridge] {}: Register to {}", name, power_event);
    let subscription = device.subscribe(&power_event);
    let mut power = PowerStateHandler::new(name, &services.power, power_delay, clock);
    tracker.spawn(pump(subscription, token.clone(), move |event| {
        power.handle(event)
    }));
    events.push(power_event);

    for group in &services.sensor_groups {
        let event_name = update_event(group.property.as_ref());
        debug!("[Bridge] {}: Register to {}", name, event_name);
        let subscription = device.subscribe(&event_name);
        let handler = SensorGroupHandler::new(&group.sensors);
        tracker.spawn(pump(subscription, token.clone(), move |event| {
            handler.handle(&event)
        }));
        events.push(event_name);
    }

    tracker.close();
    RouterHandle {
        events,
        token,
        tracker,
    }
}

async fn pump<F>(mut subscription: Subscription, token: CancellationToken, mut handle: F)
where
    F: FnMut(DeviceEvent),
{
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => handle(event),
                None => break,
            },
        }
    }
    debug!("[Bridge] Unsubscribed from {}", subscription.event_name());
}
