//! State-sync bridge between one media player and its accessory.
//!
//! This module organizes the bridge:
//! - `topology`: which (property, value) pairs get a sensor
//! - `reconciler`: idempotent service setup and orphan removal
//! - `debounce`: leading-edge gate for power state updates
//! - `router`: device events to characteristic updates
//! - `command`: controller writes to device power commands

pub mod command;
pub mod debounce;
pub mod reconciler;
pub mod router;
pub mod topology;

pub use command::PowerCommandHandler;
pub use debounce::{Clock, DebounceGate, Debounced, ManualClock, TokioClock};
pub use reconciler::{ReconcileReport, ReconciledServices, reconcile};
pub use router::RouterHandle;
pub use topology::{SensorGroup, SensorProperty, SensorTopology};

use crate::accessory::Accessory;
use crate::device::DeviceHandle;
use crate::error::Result;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// A running bridge for one accessory.
///
/// Owns the device handle and the event subscriptions. Dropping it (or
/// calling [`AppleTvAccessory::shutdown`]) stops all routing.
pub struct AppleTvAccessory {
    name: String,
    device: Arc<dyn DeviceHandle>,
    services: ReconciledServices,
    report: ReconcileReport,
    router: RouterHandle,
}

impl AppleTvAccessory {
    /// Set up services, install the power command handler and start routing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(accessory: &mut Accessory, device: Arc<dyn DeviceHandle>) -> Result<Self> {
        Self::with_clock(accessory, device, Arc::new(TokioClock))
    }

    pub fn with_clock(
        accessory: &mut Accessory,
        device: Arc<dyn DeviceHandle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = accessory.display_name().to_string();
        let delay = accessory
            .context
            .device
            .config
            .debounce_power_state_delay
            .map(Duration::from_millis);
        match delay {
            Some(delay) => debug!("[Bridge] {}: debounce power state {:?}", name, delay),
            None => debug!("[Bridge] {}: power state not debounced", name),
        }

        let topology = accessory.context.rebuild_generic_sensors();
        debug!(
            "[Bridge] {}: generic sensors {:?}",
            name, accessory.context.device.generic_sensors
        );

        let serial = device.id();
        let (services, report) = reconcile(accessory, &topology, serial.as_deref())?;

        Arc::new(PowerCommandHandler::new(name.clone(), device.clone()))
            .register(&services.power);

        let router = router::start(&name, device.as_ref(), &services, delay, clock);
        info!(
            "[Bridge] {}: tracking power state and {} sensor(s)",
            name,
            topology.sensor_count()
        );

        Ok(Self {
            name,
            device,
            services,
            report,
            router,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Arc<dyn DeviceHandle> {
        &self.device
    }

    pub fn services(&self) -> &ReconciledServices {
        &self.services
    }

    /// Services created and removed while setting up.
    pub fn report(&self) -> &ReconcileReport {
        &self.report
    }

    pub fn events(&self) -> &[String] {
        self.router.events()
    }

    pub fn is_running(&self) -> bool {
        self.router.is_running()
    }

    /// Stop routing and wait for the handler tasks to exit.
    pub async fn shutdown(&self) {
        self.router.shutdown().await;
        debug!("[Bridge] {}: stopped", self.name);
    }
}
