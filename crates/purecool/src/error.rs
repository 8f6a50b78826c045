//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use purecool_config::ConfigError;
use purecool_core::{CoreError, NotReadyKind, SetupError};

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONFIG: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to device {serial}")]
    #[diagnostic(
        code(purecool::connection_failed),
        help("Check that the fan is powered and reachable on the local network.")
    )]
    ConnectionFailed { serial: String, message: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Device {serial} rejected the credential")]
    #[diagnostic(
        code(purecool::auth_failed),
        help("Store a new credential with: purecool config set-credential --serial {serial}")
    )]
    AuthFailed { serial: String },

    #[error("No credential configured for device '{device}'")]
    #[diagnostic(
        code(purecool::no_credentials),
        help(
            "Set `credential_env` or `credential` on the device, or run:\n\
             purecool config set-credential --serial <SERIAL>"
        )
    )]
    NoCredentials { device: String },

    #[error("{failed} device(s) have no usable credential")]
    #[diagnostic(code(purecool::check_failed))]
    CredentialCheck { failed: usize },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(purecool::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(purecool::config),
        help("Run `purecool config path` to see which file is read.")
    )]
    Config(ConfigError),

    // ── Core ─────────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(purecool::core))]
    Core(#[from] CoreError),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to render config: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::CredentialCheck { .. } => {
                exit_code::AUTH
            }
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(_) => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { device } => Self::NoCredentials { device },
            other => Self::Config(other),
        }
    }
}

impl CliError {
    pub fn from_setup(err: SetupError, serial: &str) -> Self {
        match err {
            SetupError::NotReady {
                kind: NotReadyKind::InvalidAuth,
                ..
            } => Self::AuthFailed {
                serial: serial.into(),
            },
            SetupError::NotReady {
                kind: NotReadyKind::CannotConnect,
                message,
            } => Self::ConnectionFailed {
                serial: serial.into(),
                message,
            },
            SetupError::Failed(e) => Self::Core(e),
        }
    }
}
