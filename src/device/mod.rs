//! Device handle boundary for the media player.
//!
//! The bridge never talks to the player directly. Everything it needs is the
//! [`DeviceHandle`] trait: two power commands and a per-event subscription
//! delivering either a value change or a failure.
//!
//! Implementations:
//! - `pyatv`: delegates to the pyatv command line tools (`atvremote`, `atvscript`)
//! - `simulated`: in-process device for development and tests

mod hub;
pub mod pyatv;
pub mod simulated;

pub use hub::{EventHub, Subscription};
pub use pyatv::PyAtvDevice;
pub use simulated::SimulatedDevice;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Property name of the implicit power state tracked on every device.
pub const POWER_STATE: &str = "powerState";

/// Build the subscription name for a property, e.g. `update:deviceState`.
pub fn update_event(property: &str) -> String {
    format!("update:{}", property)
}

/// Power state values reported on `update:powerState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    /// Whether a raw event value is the device's "on" sentinel.
    pub fn is_on(value: &str) -> bool {
        value == PowerState::On.as_ref()
    }
}

/// Errors reported by a device handle.
///
/// Cloneable so one failure can be delivered to every subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{command} failed: {reason}")]
    CommandFailed {
        command: &'static str,
        reason: String,
    },

    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("device reported failure: {0}")]
    Reported(String),

    #[error("malformed update: {0}")]
    MalformedUpdate(String),
}

impl DeviceError {
    /// Short variant name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceError::CommandFailed { .. } => "CommandFailed",
            DeviceError::SpawnFailed { .. } => "SpawnFailed",
            DeviceError::Reported(_) => "Reported",
            DeviceError::MalformedUpdate(_) => "MalformedUpdate",
        }
    }
}

/// A single property transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub old_value: Option<String>,
    pub new_value: String,
}

impl ValueChange {
    pub fn new(old_value: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            old_value,
            new_value: new_value.into(),
        }
    }
}

/// Payload delivered on an `update:{property}` subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Update(ValueChange),
    Failed(DeviceError),
}

/// Construction parameters for a device handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub credentials: Option<String>,
}

/// Trait implemented by every media player connection.
///
/// Commands complete when the device acknowledged them. Subscriptions are
/// independent channels; dropping a [`Subscription`] unsubscribes it.
#[async_trait]
pub trait DeviceHandle: Send + Sync + 'static {
    /// Device identifier, used as serial number when known.
    fn id(&self) -> Option<String>;

    async fn turn_on(&self) -> Result<(), DeviceError>;

    async fn turn_off(&self) -> Result<(), DeviceError>;

    /// Subscribe to a named event such as `update:powerState`.
    fn subscribe(&self, event_name: &str) -> Subscription;

    /// Release background resources (update listeners, subprocesses).
    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_update_event_name() {
        assert_eq!(update_event(POWER_STATE), "update:powerState");
        assert_eq!(update_event("deviceState"), "update:deviceState");
    }

    #[test]
    fn test_power_state_sentinel() {
        assert!(PowerState::is_on("on"));
        assert!(!PowerState::is_on("off"));
        assert!(!PowerState::is_on("On"));
        assert!(!PowerState::is_on(""));
        assert_eq!(PowerState::from_str("off").ok(), Some(PowerState::Off));
        assert_eq!(PowerState::On.to_string(), "on");
    }
}
