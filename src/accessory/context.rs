//! Persisted configuration attached to an accessory.

use crate::bridge::topology::{SensorGroup, SensorTopology};
use crate::config::DeviceConfig;
use serde::{Deserialize, Serialize};

/// Context blob stored alongside the accessory in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryContext {
    pub device: DeviceContext,
}

/// The device's configuration plus the derived sensor groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    #[serde(flatten)]
    pub config: DeviceConfig,
    #[serde(default)]
    pub generic_sensors: Vec<SensorGroup>,
}

impl AccessoryContext {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            device: DeviceContext {
                config,
                generic_sensors: Vec::new(),
            },
        }
    }

    /// Replace the device configuration, keeping nothing derived from the old one.
    pub fn refresh(&mut self, config: DeviceConfig) {
        self.device.config = config;
        self.device.generic_sensors.clear();
    }

    /// Rebuild `generic_sensors` from the sensor lists and return the topology.
    ///
    /// The previous groups are discarded, never merged.
    pub fn rebuild_generic_sensors(&mut self) -> SensorTopology {
        let topology = SensorTopology::build(
            &self.device.config.device_state_sensors,
            &self.device.config.app_sensors,
        );
        self.device.generic_sensors = topology.groups().to_vec();
        topology
    }
}
