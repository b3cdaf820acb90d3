//! Service reconciliation.
//!
//! Brings an accessory's services in line with the sensor topology: the
//! information service, the power switch and one motion sensor per
//! (property, value) pair. Services are fetched or created idempotently and
//! anything else left over from a previous configuration is removed.

use super::topology::{SensorProperty, SensorTopology, sensor_subtype};
use crate::accessory::{Accessory, CharacteristicType, Service, ServiceKey, ServiceType};
use crate::error::Result;
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const MANUFACTURER: &str = "Apple Inc.";
pub const MODEL: &str = "AppleTV";
/// Serial number used when the device doesn't report an identifier.
pub const SERIAL_FALLBACK: &str = "Serial";
pub const POWER_SERVICE_NAME: &str = "Power State";

/// Sensor services of one property, in topology order.
#[derive(Debug, Clone)]
pub struct SensorServices {
    pub property: SensorProperty,
    pub sensors: Vec<(String, Arc<Service>)>,
}

/// Handles to every service the bridge drives, resolved once.
#[derive(Debug, Clone)]
pub struct ReconciledServices {
    pub information: Arc<Service>,
    pub power: Arc<Service>,
    pub sensor_groups: Vec<SensorServices>,
}

impl ReconciledServices {
    /// Look up a sensor service. Intended for tests and diagnostics; the
    /// router works on the resolved groups directly.
    pub fn sensor(&self, property: SensorProperty, value: &str) -> Option<&Arc<Service>> {
        self.sensor_groups
            .iter()
            .find(|g| g.property == property)?
            .sensors
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, service)| service)
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<ServiceKey>,
    pub removed: Vec<ServiceKey>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Reconcile `accessory`'s services against `topology`.
///
/// `serial` is the device identifier, if known.
pub fn reconcile(
    accessory: &mut Accessory,
    topology: &SensorTopology,
    serial: Option<&str>,
) -> Result<(ReconciledServices, ReconcileReport)> {
    let mut report = ReconcileReport::default();
    let mut wanted = BTreeSet::new();
    let display_name = accessory.display_name().to_string();

    let information = get_or_create(
        accessory,
        ServiceType::AccessoryInformation,
        None,
        &display_name,
        &mut report,
    )?;
    information
        .set_characteristic(CharacteristicType::Manufacturer, MANUFACTURER)
        .set_characteristic(CharacteristicType::Model, MODEL)
        .set_characteristic(
            CharacteristicType::SerialNumber,
            serial.unwrap_or(SERIAL_FALLBACK),
        );
    wanted.insert(information.key().clone());

    let power = get_or_create(
        accessory,
        ServiceType::Switch,
        None,
        POWER_SERVICE_NAME,
        &mut report,
    )?;
    power.set_characteristic(CharacteristicType::Name, POWER_SERVICE_NAME);
    wanted.insert(power.key().clone());

    let mut sensor_groups = Vec::with_capacity(topology.groups().len());
    for group in topology.groups() {
        let mut sensors = Vec::with_capacity(group.values.len());
        for value in &group.values {
            let subtype = sensor_subtype(group.property, value);
            let service = get_or_create(
                accessory,
                ServiceType::MotionSensor,
                Some(&subtype),
                value,
                &mut report,
            )?;
            service.set_characteristic(CharacteristicType::Name, value.as_str());
            wanted.insert(service.key().clone());
            sensors.push((value.clone(), service));
        }
        sensor_groups.push(SensorServices {
            property: group.property,
            sensors,
        });
    }

    let unused: Vec<ServiceKey> = accessory
        .service_keys()
        .into_iter()
        .filter(|key| !wanted.contains(key))
        .collect();
    for key in unused {
        if let Some(service) = accessory.remove_service(&key) {
            info!("Removing unused service: {}", service.display_name());
            report.removed.push(key);
        }
    }

    debug!(
        "[Bridge] {}: reconciled {} services ({} created, {} removed)",
        accessory.display_name(),
        accessory.services().len(),
        report.created.len(),
        report.removed.len()
    );

    Ok((
        ReconciledServices {
            information,
            power,
            sensor_groups,
        },
        report,
    ))
}

fn get_or_create(
    accessory: &mut Accessory,
    kind: ServiceType,
    subtype: Option<&str>,
    name: &str,
    report: &mut ReconcileReport,
) -> Result<Arc<Service>> {
    let existing = match subtype {
        Some(subtype) => accessory.service_by_subtype(kind, subtype),
        None => accessory.service(kind),
    };
    if let Some(service) = existing {
        return Ok(service);
    }
    let service = accessory.add_service(kind, name, subtype)?;
    debug!("[Bridge] Added service {}", service.key());
    report.created.push(service.key().clone());
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::{AccessoryContext, accessory_uuid};
    use crate::config::DeviceConfig;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn accessory() -> Accessory {
        Accessory::new(
            accessory_uuid("10.0.0.20"),
            "Living Room",
            AccessoryContext::new(DeviceConfig {
                name: "Living Room".into(),
                host: "10.0.0.20".into(),
                credentials: None,
                debounce_power_state_delay: None,
                device_state_sensors: vec![],
                app_sensors: vec![],
            }),
        )
    }

    fn value(service: &Service, kind: CharacteristicType) -> Option<String> {
        service.characteristic(kind).value().map(|v| v.to_string())
    }

    #[test]
    fn test_device_state_scenario_has_four_services() {
        let mut accessory = accessory();
        let topology = SensorTopology::build(&strings(&["playing", "paused"]), &[]);

        let (services, report) = reconcile(&mut accessory, &topology, None).unwrap();

        assert_eq!(accessory.services().len(), 4);
        assert_eq!(report.created.len(), 3);
        assert!(report.removed.is_empty());
        assert_eq!(
            accessory.service_keys(),
            vec![
                ServiceKey::new(ServiceType::AccessoryInformation, None),
                ServiceKey::new(ServiceType::Switch, None),
                ServiceKey::new(ServiceType::MotionSensor, Some("deviceState.playing")),
                ServiceKey::new(ServiceType::MotionSensor, Some("deviceState.paused")),
            ]
        );
        let paused = services
            .sensor(SensorProperty::DeviceState, "paused")
            .unwrap();
        assert_eq!(paused.display_name(), "paused");
        assert_eq!(services.power.display_name(), POWER_SERVICE_NAME);
    }

    #[test]
    fn test_information_characteristics() {
        let mut accessory = accessory();
        let topology = SensorTopology::default();

        let (services, _) = reconcile(&mut accessory, &topology, None).unwrap();
        let info = &services.information;
        assert_eq!(
            value(info, CharacteristicType::Manufacturer).as_deref(),
            Some(MANUFACTURER)
        );
        assert_eq!(value(info, CharacteristicType::Model).as_deref(), Some(MODEL));
        assert_eq!(
            value(info, CharacteristicType::SerialNumber).as_deref(),
            Some(SERIAL_FALLBACK)
        );

        let (services, _) = reconcile(&mut accessory, &topology, Some("C07XYZ")).unwrap();
        assert_eq!(
            value(&services.information, CharacteristicType::SerialNumber).as_deref(),
            Some("C07XYZ")
        );
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut accessory = accessory();
        let topology =
            SensorTopology::build(&strings(&["playing", "idle"]), &strings(&["com.a", "com.b"]));

        let (first, report) = reconcile(&mut accessory, &topology, None).unwrap();
        assert!(!report.is_noop());
        let keys = accessory.service_keys();

        let (second, report) = reconcile(&mut accessory, &topology, None).unwrap();
        assert!(report.is_noop());
        assert_eq!(accessory.service_keys(), keys);
        assert!(Arc::ptr_eq(&first.power, &second.power));
        assert!(Arc::ptr_eq(
            first.sensor(SensorProperty::App, "com.b").unwrap(),
            second.sensor(SensorProperty::App, "com.b").unwrap()
        ));
    }

    #[test]
    fn test_orphaned_services_removed_once() {
        let mut accessory = accessory();
        let before = SensorTopology::build(&strings(&["playing", "paused"]), &strings(&["com.a"]));
        reconcile(&mut accessory, &before, None).unwrap();
        // A stray service from some older layout
        accessory
            .add_service(ServiceType::MotionSensor, "legacy", None)
            .unwrap();

        let after = SensorTopology::build(&strings(&["paused"]), &[]);
        let (_, report) = reconcile(&mut accessory, &after, None).unwrap();

        assert!(report.created.is_empty());
        assert_eq!(
            report.removed,
            vec![
                ServiceKey::new(ServiceType::MotionSensor, Some("deviceState.playing")),
                ServiceKey::new(ServiceType::MotionSensor, Some("app.com.a")),
                ServiceKey::new(ServiceType::MotionSensor, None),
            ]
        );
        assert_eq!(accessory.services().len(), 3);

        let (_, report) = reconcile(&mut accessory, &after, None).unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn test_restored_services_are_reused() {
        let mut accessory = accessory();
        let topology = SensorTopology::build(&strings(&["playing"]), &[]);
        reconcile(&mut accessory, &topology, None).unwrap();

        let mut restored = Accessory::from_cached(accessory.to_cached());
        let (_, report) = reconcile(&mut restored, &topology, None).unwrap();

        assert!(report.is_noop());
        assert_eq!(restored.service_keys(), accessory.service_keys());
    }
}
