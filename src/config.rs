use crate::device::DeviceParams;
use crate::error::{BridgeError, Result};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under the home directory holding the accessory cache.
const STORAGE_DIR: &str = ".config/appletv-bridge";

/// Load environment variables from a `.env` file in the working directory.
///
/// Values may be unquoted even when they contain spaces. Variables already
/// set in the environment win. Must be called while the process is still
/// single-threaded.
pub fn load_dotenv() {
    let content = match fs::read_to_string(".env") {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in content.lines().filter_map(parse_dotenv_line) {
        if std::env::var(key).is_err() {
            // SAFETY: only called from `main` before the tokio runtime is built
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    Some((key.trim(), value))
}

/// Bridge configuration file.
///
/// ```json
/// {
///   "name": "AppleTV",
///   "devices": [
///     {
///       "name": "Living Room",
///       "host": "10.0.0.20",
///       "credentials": "...",
///       "debouncePowerStateDelay": 3000,
///       "device_state_sensors": ["playing", "paused"],
///       "app_sensors": ["com.netflix.Netflix"]
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_platform_name")]
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Where the accessory cache lives (defaults to `~/.config/appletv-bridge`)
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    #[serde(default)]
    pub pyatv: PyAtvConfig,
}

fn default_platform_name() -> String {
    "AppleTV".to_string()
}

/// Locations of the pyatv command line tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PyAtvConfig {
    #[serde(default = "default_atvremote")]
    pub atvremote: String,
    #[serde(default = "default_atvscript")]
    pub atvscript: String,
}

fn default_atvremote() -> String {
    "atvremote".to_string()
}

fn default_atvscript() -> String {
    "atvscript".to_string()
}

impl Default for PyAtvConfig {
    fn default() -> Self {
        Self {
            atvremote: default_atvremote(),
            atvscript: default_atvscript(),
        }
    }
}

/// Per-device options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub credentials: Option<String>,
    /// Power state debounce window in milliseconds; absent disables debouncing
    #[serde(
        rename = "debouncePowerStateDelay",
        default,
        deserialize_with = "lenient_delay",
        skip_serializing_if = "Option::is_none"
    )]
    pub debounce_power_state_delay: Option<u64>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub device_state_sensors: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub app_sensors: Vec<String>,
}

impl DeviceConfig {
    pub fn params(&self) -> DeviceParams {
        DeviceParams {
            name: self.name.clone(),
            host: self.host.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// Accept any non-negative number as a delay; anything else disables debouncing.
pub fn lenient_delay<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(ms) => Some(ms),
            None => match n.as_f64() {
                Some(ms) if ms.is_finite() && ms >= 0.0 => Some(ms.floor() as u64),
                _ => {
                    warn!("[Config] Ignoring negative debouncePowerStateDelay {}", n);
                    None
                }
            },
        },
        Some(other) => {
            warn!(
                "[Config] debouncePowerStateDelay is not a number ({}), debouncing disabled",
                other
            );
            None
        }
    })
}

/// Treat `null` like an absent list.
fn nullable_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for deployment-specific paths.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("ATV_BRIDGE_STORAGE") {
            self.storage_path = Some(PathBuf::from(path));
        }
        if let Ok(atvremote) = std::env::var("ATV_BRIDGE_ATVREMOTE") {
            self.pyatv.atvremote = atvremote;
        }
        if let Ok(atvscript) = std::env::var("ATV_BRIDGE_ATVSCRIPT") {
            self.pyatv.atvscript = atvscript;
        }
    }

    /// Reject devices without name/host and duplicate hosts.
    pub fn validate(&self) -> Result<()> {
        let mut hosts = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(BridgeError::Config(format!(
                    "device with host '{}' has no name",
                    device.host
                )));
            }
            if device.host.trim().is_empty() {
                return Err(BridgeError::Config(format!(
                    "device '{}' has no host",
                    device.name
                )));
            }
            if !hosts.insert(device.host.as_str()) {
                return Err(BridgeError::Config(format!(
                    "host {} is configured more than once",
                    device.host
                )));
            }
        }
        Ok(())
    }

    /// Directory holding `accessories.json`.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(STORAGE_DIR)
        })
    }
}
