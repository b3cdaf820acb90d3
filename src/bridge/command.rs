//! Controller writes to the power switch.

use crate::accessory::{CharacteristicType, CharacteristicValue, Service};
use crate::device::DeviceHandle;
use crate::error::Result;
use futures_util::FutureExt;
use log::debug;
use std::sync::Arc;

/// Translates `On` writes into device power commands.
///
/// The characteristic itself is never written here; the device's own
/// `update:powerState` report is the only source of the displayed state.
pub struct PowerCommandHandler {
    name: String,
    device: Arc<dyn DeviceHandle>,
}

impl PowerCommandHandler {
    pub fn new(name: impl Into<String>, device: Arc<dyn DeviceHandle>) -> Self {
        Self {
            name: name.into(),
            device,
        }
    }

    /// Issue `turn_on` for a truthy value, `turn_off` otherwise.
    ///
    /// Device errors are returned to the caller as-is.
    pub async fn set_on(&self, value: &CharacteristicValue) -> Result<()> {
        if value.is_truthy() {
            self.device.turn_on().await?;
        } else {
            self.device.turn_off().await?;
        }
        debug!("[Bridge] {}: Set Characteristic On -> {}", self.name, value);
        Ok(())
    }

    /// Install this handler on the power service's `On` characteristic.
    pub fn register(self: &Arc<Self>, power: &Service) {
        let handler = Arc::clone(self);
        power
            .characteristic(CharacteristicType::On)
            .on_set(move |value| {
                let handler = Arc::clone(&handler);
                async move { handler.set_on(&value).await }.boxed()
            });
    }
}
