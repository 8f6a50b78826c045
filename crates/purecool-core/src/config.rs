// ── Runtime entry configuration ──
//
// These types describe *what* device an entry talks to and how often it
// is refreshed. They carry credential data but never touch disk; the
// config crate builds them from files and the environment.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Namespace used for device identifiers surfaced to the host.
pub const DOMAIN: &str = "dyson_pure_cool";

/// Device type assumed when none is configured.
pub const DEFAULT_DEVICE_TYPE: &str = "438";

/// Option key for continuous monitoring.
pub const OPTION_CONTINUOUS_MONITORING: &str = "rhtm";

/// Immutable identity of one configured device.
#[derive(Debug, Clone)]
pub struct EntryData {
    /// Unique device serial, e.g. `NK6-EU-MHA0000A`.
    pub serial: String,
    /// Device credential. Secret for the whole session.
    pub credential: SecretString,
    /// Protocol variant selector.
    pub device_type: String,
    /// Device address. Empty means discovery mode.
    pub host: String,
}

impl EntryData {
    pub fn new(serial: impl Into<String>, credential: SecretString) -> Self {
        Self {
            serial: serial.into(),
            credential,
            device_type: DEFAULT_DEVICE_TYPE.into(),
            host: String::new(),
        }
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Whether the device address must be discovered rather than dialed.
    pub fn uses_discovery(&self) -> bool {
        self.host.is_empty()
    }
}

/// Options persisted on a config entry and editable after setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(rename = "rhtm", default)]
    pub continuous_monitoring: bool,
}

/// Tuning for the periodic refresh of one device.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name used in logs.
    pub name: String,
    /// Time between background refresh cycles.
    pub update_interval: Duration,
    /// Upper bound for a single pull before the cycle counts as failed.
    pub refresh_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "environmental".into(),
            update_interval: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}
