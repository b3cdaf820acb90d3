//! Sensor topology: which (property, value) pairs get a sensor service.
//!
//! The topology is derived from the two configured sensor lists and fully
//! rebuilt on every start, so removing a value from the configuration
//! removes its service on the next run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{AsRefStr, Display, EnumString};

/// Device properties that can drive generic sensors.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
pub enum SensorProperty {
    /// Playback state (`idle`, `playing`, `paused`, ...)
    #[strum(serialize = "deviceState")]
    #[serde(rename = "deviceState")]
    DeviceState,
    /// Foreground application identifier
    #[strum(serialize = "app")]
    #[serde(rename = "app")]
    App,
}

/// One property and the values that each get a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorGroup {
    pub property: SensorProperty,
    pub values: Vec<String>,
}

/// Subtype and name key of a sensor service, e.g. `deviceState.playing`.
pub fn sensor_subtype(property: SensorProperty, value: &str) -> String {
    format!("{}.{}", property, value)
}

/// Ordered list of sensor groups.
///
/// Ordering is stable: device state before app, values in configuration
/// order. Groups are never empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorTopology {
    groups: Vec<SensorGroup>,
}

impl SensorTopology {
    /// Build the topology from the configured sensor lists.
    ///
    /// Duplicate values keep their first position.
    pub fn build(device_state_sensors: &[String], app_sensors: &[String]) -> Self {
        let groups = [
            (SensorProperty::DeviceState, device_state_sensors),
            (SensorProperty::App, app_sensors),
        ]
        .into_iter()
        .filter_map(|(property, values)| {
            let mut seen = HashSet::new();
            let values: Vec<String> = values
                .iter()
                .filter(|v| seen.insert(v.as_str()))
                .cloned()
                .collect();
            (!values.is_empty()).then_some(SensorGroup { property, values })
        })
        .collect();
        Self { groups }
    }

    pub fn groups(&self) -> &[SensorGroup] {
        &self.groups
    }

    /// Every (property, value) pair in order.
    pub fn pairs(&self) -> impl Iterator<Item = (SensorProperty, &str)> {
        self.groups.iter().flat_map(|group| {
            group
                .values
                .iter()
                .map(move |value| (group.property, value.as_str()))
        })
    }

    /// Number of sensor services this topology needs.
    pub fn sensor_count(&self) -> usize {
        self.groups.iter().map(|g| g.values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
