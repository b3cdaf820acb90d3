//! Characteristic state for accessory services.
//!
//! A characteristic is a single typed value on a service. Values are written
//! through [`Characteristic::update_value`] (bridge side) and change requests
//! from the controller arrive through [`Characteristic::handle_set`], which is
//! forwarded to the handler registered with [`Characteristic::on_set`].

use crate::error::{BridgeError, Result};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::broadcast;

/// Characteristic types used by the bridge's services.
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
pub enum CharacteristicType {
    Name,
    Manufacturer,
    Model,
    SerialNumber,
    On,
    MotionDetected,
}

impl CharacteristicType {
    /// Whether a controller may write this characteristic.
    pub fn is_writable(self) -> bool {
        matches!(self, CharacteristicType::On)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacteristicValue {
    Bool(bool),
    String(String),
}

impl CharacteristicValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CharacteristicValue::Bool(b) => Some(*b),
            CharacteristicValue::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CharacteristicValue::String(s) => Some(s),
            CharacteristicValue::Bool(_) => None,
        }
    }

    /// Truthiness of a value written by a controller.
    pub fn is_truthy(&self) -> bool {
        match self {
            CharacteristicValue::Bool(b) => *b,
            CharacteristicValue::String(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for CharacteristicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacteristicValue::Bool(b) => write!(f, "{}", b),
            CharacteristicValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for CharacteristicValue {
    fn from(value: bool) -> Self {
        CharacteristicValue::Bool(value)
    }
}

impl From<&str> for CharacteristicValue {
    fn from(value: &str) -> Self {
        CharacteristicValue::String(value.to_string())
    }
}

impl From<String> for CharacteristicValue {
    fn from(value: String) -> Self {
        CharacteristicValue::String(value)
    }
}

/// Handler invoked when a controller writes a characteristic.
pub type SetHandler =
    Arc<dyn Fn(CharacteristicValue) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A value change, published to accessory change listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicChange {
    /// Subtype or type name of the owning service
    pub service: String,
    pub characteristic: CharacteristicType,
    pub value: CharacteristicValue,
}

/// Publishes characteristic changes for one service.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<CharacteristicChange>,
    service: String,
}

impl ChangeNotifier {
    pub fn new(tx: broadcast::Sender<CharacteristicChange>, service: impl Into<String>) -> Self {
        Self {
            tx,
            service: service.into(),
        }
    }

    pub fn notify(&self, characteristic: CharacteristicType, value: &CharacteristicValue) {
        // No receivers is fine; changes are informational.
        let _ = self.tx.send(CharacteristicChange {
            service: self.service.clone(),
            characteristic,
            value: value.clone(),
        });
    }
}

/// Thread-safe characteristic value.
///
/// The version is incremented each time the value changes, so tests and
/// listeners can tell whether a write actually happened.
pub struct Characteristic {
    kind: CharacteristicType,
    value: RwLock<Option<CharacteristicValue>>,
    version: AtomicU32,
    set_handler: RwLock<Option<SetHandler>>,
    notifier: Option<ChangeNotifier>,
}

impl Characteristic {
    pub fn new(kind: CharacteristicType, notifier: Option<ChangeNotifier>) -> Self {
        Self {
            kind,
            value: RwLock::new(None),
            version: AtomicU32::new(0),
            set_handler: RwLock::new(None),
            notifier,
        }
    }

    pub fn kind(&self) -> CharacteristicType {
        self.kind
    }

    pub fn value(&self) -> Option<CharacteristicValue> {
        self.value.read().clone()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.read().as_ref().and_then(CharacteristicValue::as_bool)
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Store a new value. Increments version and notifies only if it changed.
    ///
    /// Returns whether the value changed.
    pub fn update_value(&self, value: impl Into<CharacteristicValue>) -> bool {
        let value = value.into();
        {
            let mut current = self.value.write();
            if current.as_ref() == Some(&value) {
                return false;
            }
            *current = Some(value.clone());
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        if let Some(notifier) = &self.notifier {
            notifier.notify(self.kind, &value);
        }
        true
    }

    /// Register the handler for controller writes, replacing any previous one.
    pub fn on_set<F>(&self, handler: F)
    where
        F: Fn(CharacteristicValue) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        *self.set_handler.write() = Some(Arc::new(handler));
    }

    /// Forward a controller write to the registered handler.
    ///
    /// The stored value is left untouched; the bridge confirms state through
    /// `update_value` once the device reports it.
    pub async fn handle_set(&self, value: CharacteristicValue) -> Result<()> {
        let handler = self
            .set_handler
            .read()
            .clone()
            .ok_or(BridgeError::NoSetHandler(self.kind))?;
        handler(value).await
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("kind", &self.kind)
            .field("value", &*self.value.read())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_update_value_increments_version_on_change() {
        let on = Characteristic::new(CharacteristicType::On, None);
        assert_eq!(on.value(), None);
        assert_eq!(on.version(), 0);

        assert!(on.update_value(true));
        assert_eq!(on.as_bool(), Some(true));
        assert_eq!(on.version(), 1);

        // Same value doesn't increment
        assert!(!on.update_value(true));
        assert_eq!(on.version(), 1);

        assert!(on.update_value(false));
        assert_eq!(on.as_bool(), Some(false));
        assert_eq!(on.version(), 2);
    }

    #[test]
    fn test_notifier_publishes_changes() {
        let (tx, mut rx) = broadcast::channel(8);
        let name = Characteristic::new(
            CharacteristicType::Name,
            Some(ChangeNotifier::new(tx, "Switch")),
        );

        name.update_value("Power State");
        name.update_value("Power State");

        let change = rx.try_recv().unwrap();
        assert_eq!(change.service, "Switch");
        assert_eq!(change.characteristic, CharacteristicType::Name);
        assert_eq!(change.value, CharacteristicValue::from("Power State"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_set_forwards_without_storing() {
        let on = Characteristic::new(CharacteristicType::On, None);
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        on.on_set(move |value| {
            let flag = flag.clone();
            async move {
                flag.store(value.is_truthy(), Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        on.handle_set(true.into()).await.unwrap();

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(on.value(), None);
        assert_eq!(on.version(), 0);
    }

    #[tokio::test]
    async fn test_handle_set_without_handler() {
        let on = Characteristic::new(CharacteristicType::On, None);
        let err = on.handle_set(false.into()).await.unwrap_err();
        assert!(matches!(err, BridgeError::NoSetHandler(CharacteristicType::On)));
    }

    #[test]
    fn test_value_truthiness() {
        assert!(CharacteristicValue::Bool(true).is_truthy());
        assert!(!CharacteristicValue::Bool(false).is_truthy());
        assert!(!CharacteristicValue::from("").is_truthy());
        assert!(CharacteristicValue::from("1").is_truthy());
    }
}
