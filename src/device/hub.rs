//! Subscriber bookkeeping shared by device handle implementations.

use super::{DeviceError, DeviceEvent};
use log::trace;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Receiving end of a device event subscription.
///
/// Each subscription owns its own channel, so events for one property are
/// delivered in order and never interleave with another subscriber's queue.
pub struct Subscription {
    event_name: String,
    rx: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl Subscription {
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Wait for the next event. Returns `None` once the device is dropped.
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used by tests.
    pub fn try_recv(&mut self) -> Option<DeviceEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of device events to subscribers keyed by event name.
#[derive(Default)]
pub struct EventHub {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<DeviceEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_name: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .entry(event_name.to_string())
            .or_default()
            .push(tx);
        Subscription {
            event_name: event_name.to_string(),
            rx,
        }
    }

    /// Deliver an event to every live subscriber of `event_name`.
    ///
    /// Subscribers whose receiver was dropped are pruned.
    pub fn emit(&self, event_name: &str, event: DeviceEvent) {
        let mut subscribers = self.subscribers.write();
        if let Some(senders) = subscribers.get_mut(event_name) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            trace!(
                "[Device] {} delivered to {} subscriber(s)",
                event_name,
                senders.len()
            );
            if senders.is_empty() {
                subscribers.remove(event_name);
            }
        }
    }

    /// Deliver a failure to every subscription, whatever its event name.
    pub fn fail_all(&self, error: DeviceError) {
        let mut subscribers = self.subscribers.write();
        for senders in subscribers.values_mut() {
            senders.retain(|tx| tx.send(DeviceEvent::Failed(error.clone())).is_ok());
        }
        subscribers.retain(|_, senders| !senders.is_empty());
    }

    /// Number of live subscribers for an event name.
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.subscribers
            .read()
            .get(event_name)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}
