// ── Core error types ──
//
// Errors surfaced by the synchronization core. Device clients translate
// their transport failures into these variants; the entry lifecycle then
// sorts them into "retry later" versus hard setup failures.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    InvalidAuth { message: String },

    #[error("Cannot connect to device: {reason}")]
    CannotConnect { reason: String },

    #[error("Device not connected")]
    NotConnected,

    #[error("Device did not respond within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Update failed: {message}")]
    UpdateFailed { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Config entry not found: {entry_id}")]
    EntryNotFound { entry_id: String },

    #[error("Config entry {entry_id} is already set up")]
    AlreadySetUp { entry_id: String },

    #[error("Config entry {entry_id} is being set up")]
    SetupInProgress { entry_id: String },

    #[error("Device {serial} is already configured")]
    AlreadyConfigured { serial: String },

    #[error("Platform {platform} failed: {message}")]
    Platform { platform: String, message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The "retry later" classification of this error, if it has one.
    ///
    /// Only credential and connectivity failures qualify. Everything else
    /// propagates out of entry setup unchanged.
    pub fn not_ready_kind(&self) -> Option<NotReadyKind> {
        match self {
            Self::InvalidAuth { .. } => Some(NotReadyKind::InvalidAuth),
            Self::CannotConnect { .. } => Some(NotReadyKind::CannotConnect),
            _ => None,
        }
    }
}

/// Why a config entry reported "not ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum NotReadyKind {
    #[strum(to_string = "invalid credential")]
    InvalidAuth,
    #[strum(to_string = "cannot connect")]
    CannotConnect,
}

/// Outcome of a failed config entry setup.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The host should retry setup later; the entry is not disabled.
    #[error("Config entry not ready ({kind}): {message}")]
    NotReady { kind: NotReadyKind, message: String },

    /// Any other failure, propagated as-is.
    #[error(transparent)]
    Failed(CoreError),
}

impl SetupError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}
