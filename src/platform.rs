//! Platform: one bridged accessory per configured device.
//!
//! On start the accessory cache is loaded, every configured device gets its
//! accessory back (or a new one), the bridge is attached, and cached
//! accessories that are no longer configured are dropped. The cache is saved
//! after start and again on shutdown.

use crate::accessory::{Accessory, AccessoryCache, AccessoryContext, accessory_uuid};
use crate::bridge::AppleTvAccessory;
use crate::config::{Config, DeviceConfig};
use crate::device::simulated::run_simulation;
use crate::device::{DeviceHandle, POWER_STATE, PowerState, PyAtvDevice, SimulatedDevice};
use crate::error::Result;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Device states cycled by the simulation when none are configured.
const SIMULATED_DEVICE_STATES: &[&str] = &["idle", "playing", "paused"];

/// An accessory with its running bridge.
pub struct BridgedDevice {
    accessory: Accessory,
    bridge: AppleTvAccessory,
    simulation: Option<JoinHandle<()>>,
}

impl BridgedDevice {
    pub fn accessory(&self) -> &Accessory {
        &self.accessory
    }

    pub fn bridge(&self) -> &AppleTvAccessory {
        &self.bridge
    }

    async fn shutdown(&mut self) {
        if let Some(task) = self.simulation.take() {
            task.abort();
        }
        self.bridge.shutdown().await;
        self.bridge.device().stop();
    }
}

#[derive(Debug, Clone, Copy)]
enum DeviceMode {
    PyAtv,
    /// In-process devices, optionally reporting random values every period
    Simulated(Option<Duration>),
}

pub struct Platform {
    config: Config,
    cache_path: PathBuf,
    mode: DeviceMode,
    devices: Vec<BridgedDevice>,
}

impl Platform {
    pub fn new(config: Config) -> Self {
        let cache_path = AccessoryCache::path_in(&config.storage_dir());
        Self {
            config,
            cache_path,
            mode: DeviceMode::PyAtv,
            devices: Vec::new(),
        }
    }

    /// Use simulated devices instead of pyatv.
    ///
    /// With a `period`, each device reports random states at that interval.
    pub fn with_simulation(mut self, period: Option<Duration>) -> Self {
        self.mode = DeviceMode::Simulated(period);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn devices(&self) -> &[BridgedDevice] {
        &self.devices
    }

    pub fn device(&self, uuid: Uuid) -> Option<&BridgedDevice> {
        self.devices.iter().find(|d| d.accessory.uuid() == uuid)
    }

    /// Restore or create every configured accessory and start its bridge.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if !self.devices.is_empty() {
            warn!("[Platform] {} already started", self.config.name);
            return Ok(());
        }

        let mut cache = AccessoryCache::load(&self.cache_path);
        for config in self.config.devices.clone() {
            let uuid = accessory_uuid(&config.host);
            let mut accessory = match cache.take(uuid) {
                Some(cached) => {
                    info!(
                        "[Platform] Restoring existing accessory from cache: {}",
                        cached.display_name
                    );
                    let mut accessory = Accessory::from_cached(cached);
                    accessory.context.refresh(config.clone());
                    accessory
                }
                None => {
                    info!("[Platform] Adding new accessory: {}", config.name);
                    Accessory::new(uuid, config.name.clone(), AccessoryContext::new(config.clone()))
                }
            };

            let (device, simulation) = self.build_device(&config);
            let bridge = AppleTvAccessory::new(&mut accessory, device)?;
            self.devices.push(BridgedDevice {
                accessory,
                bridge,
                simulation,
            });
        }

        for stale in &cache.accessories {
            info!(
                "[Platform] Removing existing accessory from cache: {}",
                stale.display_name
            );
        }

        info!(
            "[Platform] {} started with {} accessory(ies)",
            self.config.name,
            self.devices.len()
        );
        self.persist();
        Ok(())
    }

    fn build_device(&self, config: &DeviceConfig) -> (Arc<dyn DeviceHandle>, Option<JoinHandle<()>>) {
        match self.mode {
            DeviceMode::PyAtv => {
                let device = PyAtvDevice::new(config.params())
                    .with_tools(&self.config.pyatv.atvremote, &self.config.pyatv.atvscript);
                device.start();
                (Arc::new(device), None)
            }
            DeviceMode::Simulated(period) => {
                let device = Arc::new(SimulatedDevice::new(config.params()));
                let simulation =
                    period.map(|period| run_simulation(device.clone(), simulated_values(config), period));
                (device, simulation)
            }
        }
    }

    /// Write every bridged accessory to the cache file.
    pub fn save_cache(&self) -> Result<()> {
        let mut cache = AccessoryCache {
            saved_at: None,
            accessories: self.devices.iter().map(|d| d.accessory.to_cached()).collect(),
        };
        cache.save(&self.cache_path)?;
        Ok(())
    }

    /// Save the cache, logging failures instead of stopping the bridges.
    fn persist(&self) {
        if let Err(e) = self.save_cache() {
            warn!(
                "[Cache] Failed to save accessory cache to {:?}: {}",
                self.cache_path, e
            );
        }
    }

    /// Stop every bridge and device, then save the cache.
    pub async fn shutdown(&mut self) {
        for device in &mut self.devices {
            device.shutdown().await;
        }
        info!("[Platform] {} stopped", self.config.name);
        self.persist();
    }
}

fn simulated_values(config: &DeviceConfig) -> Vec<(String, Vec<String>)> {
    let power = vec![PowerState::On.to_string(), PowerState::Off.to_string()];
    let states = if config.device_state_sensors.is_empty() {
        SIMULATED_DEVICE_STATES.iter().map(|s| s.to_string()).collect()
    } else {
        config.device_state_sensors.clone()
    };
    let mut values = vec![
        (POWER_STATE.to_string(), power),
        ("deviceState".to_string(), states),
    ];
    if !config.app_sensors.is_empty() {
        values.push(("app".to_string(), config.app_sensors.clone()));
    }
    values
}
