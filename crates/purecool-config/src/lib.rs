//! Configuration for purecool.
//!
//! TOML device profiles, credential resolution (env + keyring + plaintext),
//! and translation to `purecool_core::EntryData` / `CoordinatorConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use purecool_core::{CoordinatorConfig, DEFAULT_DEVICE_TYPE, EntryData};

/// Keyring service under which device credentials are stored.
pub const KEYRING_SERVICE: &str = "purecool";

/// Prefix for environment overrides, e.g. `PURECOOL_COORDINATOR__UPDATE_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "PURECOOL_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credential configured for device '{device}'")]
    NoCredentials { device: String },

    #[error("device '{name}' not found in config")]
    UnknownDevice { name: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Background refresh tuning shared by every device.
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Named device profiles.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceProfile>,
}

impl Config {
    pub fn device(&self, name: &str) -> Result<&DeviceProfile, ConfigError> {
        self.devices.get(name).ok_or_else(|| ConfigError::UnknownDevice {
            name: name.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

fn default_update_interval() -> u64 {
    5
}
fn default_refresh_timeout() -> u64 {
    10
}

/// One configured fan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceProfile {
    /// Device serial, e.g. "NK6-EU-MHA0000A".
    pub serial: String,

    /// Credential (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// Environment variable name containing the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,

    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Device address. Empty means discovery.
    #[serde(default)]
    pub host: String,
}

impl DeviceProfile {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            credential: None,
            credential_env: None,
            device_type: default_device_type(),
            host: String::new(),
        }
    }
}

fn default_device_type() -> String {
    DEFAULT_DEVICE_TYPE.into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "purecool", "purecool").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("purecool");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` + environment. A missing file yields the
/// defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    for (name, profile) in &config.devices {
        if profile.serial.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: format!("devices.{name}.serial"),
                reason: "must not be empty".into(),
            });
        }
    }
    if config.coordinator.update_interval_secs == 0 {
        return Err(ConfigError::Validation {
            field: "coordinator.update_interval_secs".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.coordinator.refresh_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            field: "coordinator.refresh_timeout_secs".into(),
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_user(serial: &str) -> String {
    format!("{serial}/credential")
}

/// Resolve a device credential: `credential_env`, then keyring, then the
/// plaintext value in the profile.
pub fn resolve_credential(
    profile: &DeviceProfile,
    device_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's credential_env -> env var lookup
    if let Some(ref env_name) = profile.credential_env {
        if let Ok(val) = std::env::var(env_name) {
            debug!(device = device_name, source = "env", "credential resolved");
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(&profile.serial)) {
        if let Ok(secret) = entry.get_password() {
            debug!(device = device_name, source = "keyring", "credential resolved");
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref credential) = profile.credential {
        debug!(device = device_name, source = "config", "credential resolved");
        return Ok(SecretString::from(credential.clone()));
    }

    Err(ConfigError::NoCredentials {
        device: device_name.into(),
    })
}

/// Store a credential in the system keyring for `serial`.
pub fn store_credential(serial: &str, credential: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(serial))?;
    entry.set_password(credential)?;
    Ok(())
}

// ── Translation to core types ───────────────────────────────────────

/// Build the core `EntryData` for a device profile, resolving its credential.
pub fn device_to_entry_data(
    profile: &DeviceProfile,
    device_name: &str,
) -> Result<EntryData, ConfigError> {
    let credential = resolve_credential(profile, device_name)?;
    Ok(EntryData::new(profile.serial.trim(), credential)
        .with_device_type(profile.device_type.clone())
        .with_host(profile.host.trim()))
}

/// Build the core `CoordinatorConfig` from the `[coordinator]` table.
pub fn coordinator_config(section: &CoordinatorSection) -> CoordinatorConfig {
    CoordinatorConfig {
        update_interval: Duration::from_secs(section.update_interval_secs),
        refresh_timeout: Duration::from_secs(section.refresh_timeout_secs),
        ..CoordinatorConfig::default()
    }
}
