use thiserror::Error as ThisError;

use crate::accessory::{CharacteristicType, ServiceKey, ServiceType};
use crate::device::DeviceError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Characteristic {characteristic} is not writable on {service} service")]
    ReadOnlyCharacteristic {
        service: ServiceType,
        characteristic: CharacteristicType,
    },

    #[error("Service {0} already exists")]
    DuplicateService(ServiceKey),

    #[error("No handler registered for {0} set requests")]
    NoSetHandler(CharacteristicType),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
