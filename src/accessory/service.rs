//! Services: named groups of characteristics on an accessory.

use super::characteristic::{
    ChangeNotifier, Characteristic, CharacteristicType, CharacteristicValue,
};
use crate::error::{BridgeError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};

/// Service types exposed by the bridge.
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
pub enum ServiceType {
    /// Identification (manufacturer, model, serial)
    AccessoryInformation,
    /// On/off switch
    Switch,
    /// Motion sensor, used as a generic "value is active" trigger
    MotionSensor,
}

impl ServiceType {
    /// Characteristics every service of this type carries.
    pub fn required_characteristics(self) -> &'static [CharacteristicType] {
        match self {
            ServiceType::AccessoryInformation => &[
                CharacteristicType::Name,
                CharacteristicType::Manufacturer,
                CharacteristicType::Model,
                CharacteristicType::SerialNumber,
            ],
            ServiceType::Switch => &[CharacteristicType::Name, CharacteristicType::On],
            ServiceType::MotionSensor => {
                &[CharacteristicType::Name, CharacteristicType::MotionDetected]
            }
        }
    }
}

/// Identity of a service within an accessory.
///
/// Two services on one accessory never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub kind: ServiceType,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl ServiceKey {
    pub fn new(kind: ServiceType, subtype: Option<&str>) -> Self {
        Self {
            kind,
            subtype: subtype.map(String::from),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtype {
            Some(subtype) => write!(f, "{}({})", self.kind, subtype),
            None => write!(f, "{}", self.kind),
        }
    }
}

pub struct Service {
    key: ServiceKey,
    characteristics: RwLock<BTreeMap<CharacteristicType, Arc<Characteristic>>>,
    notifier: Option<ChangeNotifier>,
}

impl Service {
    /// Create a service with its required characteristics and display name.
    pub fn new(key: ServiceKey, name: &str, notifier: Option<ChangeNotifier>) -> Self {
        let characteristics = key
            .kind
            .required_characteristics()
            .iter()
            .map(|ty| (*ty, Arc::new(Characteristic::new(*ty, notifier.clone()))))
            .collect();
        let service = Self {
            key,
            characteristics: RwLock::new(characteristics),
            notifier,
        };
        service.set_characteristic(CharacteristicType::Name, name);
        service
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn kind(&self) -> ServiceType {
        self.key.kind
    }

    pub fn subtype(&self) -> Option<&str> {
        self.key.subtype.as_deref()
    }

    /// Current value of the `Name` characteristic.
    pub fn display_name(&self) -> String {
        self.characteristic(CharacteristicType::Name)
            .value()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| self.key.to_string())
    }

    /// Get a characteristic, adding it if the service doesn't carry it yet.
    pub fn characteristic(&self, kind: CharacteristicType) -> Arc<Characteristic> {
        if let Some(existing) = self.characteristics.read().get(&kind) {
            return existing.clone();
        }
        self.characteristics
            .write()
            .entry(kind)
            .or_insert_with(|| Arc::new(Characteristic::new(kind, self.notifier.clone())))
            .clone()
    }

    /// Update a characteristic value. Returns `self` for chaining.
    pub fn set_characteristic(
        &self,
        kind: CharacteristicType,
        value: impl Into<CharacteristicValue>,
    ) -> &Self {
        self.characteristic(kind).update_value(value);
        self
    }

    pub fn characteristic_types(&self) -> Vec<CharacteristicType> {
        self.characteristics.read().keys().copied().collect()
    }

    /// Handle a write from the controller.
    pub async fn write(&self, kind: CharacteristicType, value: CharacteristicValue) -> Result<()> {
        if !kind.is_writable() {
            return Err(BridgeError::ReadOnlyCharacteristic {
                service: self.key.kind,
                characteristic: kind,
            });
        }
        self.characteristic(kind).handle_set(value).await
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("key", &self.key)
            .field("characteristics", &*self.characteristics.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_service_has_required_characteristics_and_name() {
        let service = Service::new(
            ServiceKey::new(ServiceType::MotionSensor, Some("deviceState.playing")),
            "playing",
            None,
        );
        assert_eq!(
            service.characteristic_types(),
            vec![CharacteristicType::Name, CharacteristicType::MotionDetected]
        );
        assert_eq!(service.display_name(), "playing");
        assert_eq!(service.subtype(), Some("deviceState.playing"));
        assert_eq!(
            service.characteristic(CharacteristicType::MotionDetected).value(),
            None
        );
    }

    #[test]
    fn test_characteristic_is_shared() {
        let service = Service::new(ServiceKey::new(ServiceType::Switch, None), "Power", None);
        let a = service.characteristic(CharacteristicType::On);
        let b = service.characteristic(CharacteristicType::On);
        assert!(Arc::ptr_eq(&a, &b));

        service.set_characteristic(CharacteristicType::On, true);
        assert_eq!(a.as_bool(), Some(true));
    }

    #[test]
    fn test_service_key_display() {
        assert_eq!(ServiceKey::new(ServiceType::Switch, None).to_string(), "Switch");
        assert_eq!(
            ServiceKey::new(ServiceType::MotionSensor, Some("app.com.netflix")).to_string(),
            "MotionSensor(app.com.netflix)"
        );
    }

    #[tokio::test]
    async fn test_write_rejects_read_only() {
        let service = Service::new(
            ServiceKey::new(ServiceType::AccessoryInformation, None),
            "Apple TV",
            None,
        );
        let err = service
            .write(CharacteristicType::Model, "Other".into())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ReadOnlyCharacteristic { .. }));
    }
}
