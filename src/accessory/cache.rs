//! Accessory persistence across restarts.
//!
//! The cache stores each accessory's identity, its context blob and the keys
//! and names of its services. On the next start the accessories are rebuilt
//! from it, so the service reconciler sees what the previous run exposed and
//! can remove services the configuration no longer asks for.

use super::context::AccessoryContext;
use super::service::ServiceKey;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the cache inside the storage directory.
pub const CACHE_FILE: &str = "accessories.json";

/// Persisted service identity and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedService {
    pub key: ServiceKey,
    pub name: String,
}

/// Persisted accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccessory {
    pub uuid: Uuid,
    pub display_name: String,
    pub context: AccessoryContext,
    pub services: Vec<CachedService>,
}

/// Contents of `accessories.json`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AccessoryCache {
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accessories: Vec<CachedAccessory>,
}

impl AccessoryCache {
    /// Path of the cache file inside a storage directory.
    pub fn path_in(storage_dir: &Path) -> PathBuf {
        storage_dir.join(CACHE_FILE)
    }

    /// Load from file. A missing or unreadable cache yields an empty one.
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<AccessoryCache>(&bytes) {
                Ok(cache) => {
                    info!(
                        "[Cache] Loaded {} cached accessories from {:?}",
                        cache.accessories.len(),
                        path
                    );
                    cache
                }
                Err(e) => {
                    warn!("[Cache] Failed to parse accessory cache: {}", e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[Cache] No cached accessories found (first run)");
                Self::default()
            }
            Err(e) => {
                error!("[Cache] Failed to read accessory cache: {}", e);
                Self::default()
            }
        }
    }

    /// Save to file, creating the storage directory if needed.
    pub fn save(&mut self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.saved_at = Some(Utc::now());
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        info!(
            "[Cache] Saved {} accessories to {:?}",
            self.accessories.len(),
            path
        );
        Ok(())
    }

    /// Take the cached accessory with this UUID out of the cache.
    pub fn take(&mut self, uuid: Uuid) -> Option<CachedAccessory> {
        let index = self.accessories.iter().position(|a| a.uuid == uuid)?;
        Some(self.accessories.remove(index))
    }

    /// Add or replace an accessory.
    pub fn upsert(&mut self, accessory: CachedAccessory) {
        self.accessories.retain(|a| a.uuid != accessory.uuid);
        self.accessories.push(accessory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::service::ServiceType;
    use crate::config::DeviceConfig;

    fn cached(host: &str) -> CachedAccessory {
        CachedAccessory {
            uuid: crate::accessory::accessory_uuid(host),
            display_name: "Den".into(),
            context: AccessoryContext::new(DeviceConfig {
                name: "Den".into(),
                host: host.into(),
                credentials: None,
                debounce_power_state_delay: Some(1000),
                device_state_sensors: vec!["playing".into()],
                app_sensors: vec![],
            }),
            services: vec![CachedService {
                key: ServiceKey::new(ServiceType::Switch, None),
                name: "Power State".into(),
            }],
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("appletv-bridge-test-{}-{}", name, std::process::id()))
            .join(CACHE_FILE)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let cache = AccessoryCache::load(&temp_path("missing"));
        assert!(cache.accessories.is_empty());
        assert!(cache.saved_at.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("save");
        let mut cache = AccessoryCache::default();
        cache.upsert(cached("10.0.0.1"));
        cache.upsert(cached("10.0.0.2"));
        cache.upsert(cached("10.0.0.1"));
        assert_eq!(cache.accessories.len(), 2);

        cache.save(&path).unwrap();
        let loaded = AccessoryCache::load(&path);
        assert_eq!(loaded.accessories, cache.accessories);
        assert!(loaded.saved_at.is_some());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let path = temp_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();

        assert!(AccessoryCache::load(&path).accessories.is_empty());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_take() {
        let mut cache = AccessoryCache::default();
        cache.upsert(cached("10.0.0.1"));
        let uuid = crate::accessory::accessory_uuid("10.0.0.1");

        assert_eq!(cache.take(uuid).map(|a| a.uuid), Some(uuid));
        assert!(cache.take(uuid).is_none());
    }
}
