//! Accessory registry: the surface exposed to the smart-home controller.
//!
//! This module organizes the accessory model:
//! - `characteristic`: typed values with change notification and set handlers
//! - `service`: groups of characteristics keyed by type and subtype
//! - `context`: persisted per-accessory configuration
//! - `cache`: accessory persistence across restarts

pub mod cache;
pub mod characteristic;
pub mod context;
pub mod service;

pub use cache::{AccessoryCache, CachedAccessory, CachedService};
pub use characteristic::{
    ChangeNotifier, Characteristic, CharacteristicChange, CharacteristicType, CharacteristicValue,
};
pub use context::{AccessoryContext, DeviceContext};
pub use service::{Service, ServiceKey, ServiceType};

use crate::error::{BridgeError, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the characteristic change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Namespace for accessory UUIDs derived from device hosts.
const ACCESSORY_NAMESPACE: Uuid = Uuid::from_u128(0x6a1d_93f4_2c1b_4e6f_9a53_0b7e_52c4_d8a1);

/// Stable accessory identity for a device host.
pub fn accessory_uuid(host: &str) -> Uuid {
    Uuid::new_v5(&ACCESSORY_NAMESPACE, host.as_bytes())
}

/// A single exposed device with its services.
///
/// Service membership only changes through `add_service`/`remove_service`,
/// which need `&mut self`; characteristic values are shared through `Arc`
/// and can be written from any task.
pub struct Accessory {
    uuid: Uuid,
    display_name: String,
    pub context: AccessoryContext,
    services: Vec<Arc<Service>>,
    changes: broadcast::Sender<CharacteristicChange>,
}

impl Accessory {
    /// Create an accessory carrying only its information service.
    pub fn new(uuid: Uuid, display_name: impl Into<String>, context: AccessoryContext) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let mut accessory = Self {
            uuid,
            display_name: display_name.into(),
            context,
            services: Vec::new(),
            changes,
        };
        let name = accessory.display_name.clone();
        accessory.attach(ServiceKey::new(ServiceType::AccessoryInformation, None), &name);
        accessory
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn service_keys(&self) -> Vec<ServiceKey> {
        self.services.iter().map(|s| s.key().clone()).collect()
    }

    /// First service of the given type, whatever its subtype.
    pub fn service(&self, kind: ServiceType) -> Option<Arc<Service>> {
        self.services.iter().find(|s| s.kind() == kind).cloned()
    }

    pub fn service_by_subtype(&self, kind: ServiceType, subtype: &str) -> Option<Arc<Service>> {
        self.services
            .iter()
            .find(|s| s.kind() == kind && s.subtype() == Some(subtype))
            .cloned()
    }

    /// Add a new service. Fails if a service with the same key exists.
    pub fn add_service(
        &mut self,
        kind: ServiceType,
        name: &str,
        subtype: Option<&str>,
    ) -> Result<Arc<Service>> {
        let key = ServiceKey::new(kind, subtype);
        if self.services.iter().any(|s| s.key() == &key) {
            return Err(BridgeError::DuplicateService(key));
        }
        Ok(self.attach(key, name))
    }

    /// Remove a service, returning it if it was present.
    pub fn remove_service(&mut self, key: &ServiceKey) -> Option<Arc<Service>> {
        let index = self.services.iter().position(|s| s.key() == key)?;
        Some(self.services.remove(index))
    }

    /// Listen to characteristic value changes on every service.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<CharacteristicChange> {
        self.changes.subscribe()
    }

    fn attach(&mut self, key: ServiceKey, name: &str) -> Arc<Service> {
        let label = key.subtype.clone().unwrap_or_else(|| key.kind.to_string());
        let notifier = ChangeNotifier::new(self.changes.clone(), label);
        let service = Arc::new(Service::new(key, name, Some(notifier)));
        self.services.push(service.clone());
        service
    }

    /// Snapshot for the accessory cache.
    pub fn to_cached(&self) -> CachedAccessory {
        CachedAccessory {
            uuid: self.uuid,
            display_name: self.display_name.clone(),
            context: self.context.clone(),
            services: self
                .services
                .iter()
                .map(|s| CachedService {
                    key: s.key().clone(),
                    name: s.display_name(),
                })
                .collect(),
        }
    }

    /// Rebuild an accessory from the cache, services included.
    pub fn from_cached(cached: CachedAccessory) -> Self {
        let mut accessory = Self::new(cached.uuid, cached.display_name, cached.context);
        for service in cached.services {
            if accessory.services.iter().any(|s| s.key() == &service.key) {
                continue;
            }
            accessory.attach(service.key, &service.name);
        }
        accessory
    }
}
