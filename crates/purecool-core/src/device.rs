// ── Device client contract ──
//
// The core never speaks the device protocol. It drives a `DeviceClient`,
// which owns the connection, the raw state, and the push channel for
// unsolicited state changes. `MemoryDevice` is a complete in-process
// implementation for offline use and tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::config::EntryData;
use crate::error::CoreError;
use crate::listener::{Callback, ListenerGuard, ListenerSet};
use crate::model::{DeviceCommand, DeviceState, FieldMap};

/// Payload delivered to push listeners.
#[derive(Debug, Clone)]
pub struct DeviceUpdate {
    pub serial: String,
    pub state: Arc<DeviceState>,
}

/// Connection to one physical device.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    fn serial(&self) -> &str;

    fn device_type(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Latest merged state known to the client.
    fn state(&self) -> Arc<DeviceState>;

    fn continuous_monitoring(&self) -> bool {
        self.state().continuous_monitoring()
    }

    /// Connect and wait for the first state. An empty `host` selects
    /// discovery. Fails with `InvalidAuth` or `CannotConnect` when the device
    /// refuses the session.
    async fn connect(&self, host: &str) -> Result<(), CoreError>;

    async fn disconnect(&self);

    /// Request fresh environmental data and return the merged state.
    async fn fetch_state(&self) -> Result<Arc<DeviceState>, CoreError>;

    async fn send_command(&self, command: DeviceCommand) -> Result<(), CoreError>;

    async fn set_continuous_monitoring(&self, enabled: bool) -> Result<(), CoreError> {
        let command = DeviceCommand::set_continuous_monitoring(&self.state(), enabled);
        self.send_command(command).await
    }

    /// Register a callback for unsolicited state changes. The registration
    /// lives as long as the returned guard.
    fn add_update_listener(&self, callback: Callback<DeviceUpdate>) -> ListenerGuard;
}

/// Builds a client for a config entry.
pub trait DeviceFactory: Send + Sync {
    fn create(&self, data: &EntryData) -> Result<Arc<dyn DeviceClient>, CoreError>;
}

impl<F> DeviceFactory for F
where
    F: Fn(&EntryData) -> Result<Arc<dyn DeviceClient>, CoreError> + Send + Sync,
{
    fn create(&self, data: &EntryData) -> Result<Arc<dyn DeviceClient>, CoreError> {
        self(data)
    }
}

// ── In-memory device ─────────────────────────────────────────────────

/// How a [`MemoryDevice`] refuses a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    InvalidAuth,
    CannotConnect,
    NotConnected,
}

impl ConnectFailure {
    fn to_error(self) -> CoreError {
        match self {
            Self::InvalidAuth => CoreError::InvalidAuth {
                message: "Connection refused - bad username or password".into(),
            },
            Self::CannotConnect => CoreError::CannotConnect {
                reason: "Connection refused - server unavailable".into(),
            },
            Self::NotConnected => CoreError::NotConnected,
        }
    }
}

/// A device held entirely in memory.
///
/// Commands are applied to the product state and announced to push
/// listeners, the way a real device answers a state-set with a state-change
/// message. Failures and latency can be injected.
pub struct MemoryDevice {
    serial: String,
    device_type: String,
    connected: AtomicBool,
    state: watch::Sender<Arc<DeviceState>>,
    listeners: ListenerSet<DeviceUpdate>,
    commands: Mutex<Vec<DeviceCommand>>,
    connect_failure: Mutex<Option<ConnectFailure>>,
    pending_fetch_failures: AtomicU32,
    fetch_count: AtomicU32,
    fetch_delay: Mutex<Option<Duration>>,
    connect_delay: Mutex<Option<Duration>>,
}

impl MemoryDevice {
    pub fn new(serial: impl Into<String>, device_type: impl Into<String>) -> Self {
        let (state, _) = watch::channel(Arc::new(DeviceState::default()));
        Self {
            serial: serial.into(),
            device_type: device_type.into(),
            connected: AtomicBool::new(false),
            state,
            listeners: ListenerSet::new(),
            commands: Mutex::new(Vec::new()),
            connect_failure: Mutex::new(None),
            pending_fetch_failures: AtomicU32::new(0),
            fetch_count: AtomicU32::new(0),
            fetch_delay: Mutex::new(None),
            connect_delay: Mutex::new(None),
        }
    }

    pub fn from_entry(data: &EntryData) -> Self {
        Self::new(data.serial.clone(), data.device_type.clone())
    }

    pub fn with_state(self, state: DeviceState) -> Self {
        self.state.send_replace(Arc::new(state));
        self
    }

    /// Make every following `connect` fail, or succeed again with `None`.
    pub fn fail_connect(&self, failure: Option<ConnectFailure>) {
        *lock(&self.connect_failure) = failure;
    }

    /// Make the next `count` pulls fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.pending_fetch_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every pull by `delay`.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *lock(&self.fetch_delay) = delay;
    }

    /// Delay every `connect` by `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *lock(&self.connect_delay) = delay;
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Commands received so far, oldest first.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        lock(&self.commands).clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Replace the environmental readings returned by the next pull.
    pub fn set_environment(&self, environment: FieldMap) {
        self.state.send_modify(|state| {
            let mut next = DeviceState::clone(state);
            next.environment = environment;
            *state = Arc::new(next);
        });
    }

    /// Simulate an unsolicited state-change message. Each field arrives as a
    /// `[previous, current]` pair.
    pub fn push_state_change<'a>(&self, fields: impl IntoIterator<Item = (&'a str, String)>) {
        self.state.send_modify(|state| {
            let mut next = DeviceState::clone(state);
            for (key, value) in fields {
                let previous = next.field(key).unwrap_or(&value).to_owned();
                next.product.insert(
                    key.to_owned(),
                    Value::Array(vec![Value::String(previous), Value::String(value)]),
                );
            }
            *state = Arc::new(next);
        });
        self.announce();
    }

    fn announce(&self) {
        let update = DeviceUpdate {
            serial: self.serial.clone(),
            state: self.state(),
        };
        let notified = self.listeners.notify(&update);
        debug!(serial = %self.serial, notified, "state change pushed");
    }

    fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::NotConnected)
        }
    }
}

#[async_trait]
impl DeviceClient for MemoryDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> Arc<DeviceState> {
        Arc::clone(&self.state.borrow())
    }

    async fn connect(&self, host: &str) -> Result<(), CoreError> {
        let delay = *lock(&self.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *lock(&self.connect_failure);
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }
        self.connected.store(true, Ordering::SeqCst);
        let host = if host.is_empty() { "<discovery>" } else { host };
        debug!(serial = %self.serial, device_type = %self.device_type, host, "connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(serial = %self.serial, "disconnected");
        }
    }

    async fn fetch_state(&self) -> Result<Arc<DeviceState>, CoreError> {
        self.ensure_connected()?;
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .pending_fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CoreError::UpdateFailed {
                message: "no environmental data received".into(),
            });
        }
        Ok(self.state())
    }

    async fn send_command(&self, command: DeviceCommand) -> Result<(), CoreError> {
        self.ensure_connected()?;
        debug!(serial = %self.serial, command = command.name(), "sending command");

        let fields = command.fields();
        lock(&self.commands).push(command);
        self.state
            .send_modify(|state| *state = Arc::new(state.with_product_fields(fields)));
        self.announce();
        Ok(())
    }

    fn add_update_listener(&self, callback: Callback<DeviceUpdate>) -> ListenerGuard {
        self.listeners.add_shared(callback)
    }
}

impl fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("serial", &self.serial)
            .field("device_type", &self.device_type)
            .field("connected", &self.is_connected())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn device() -> MemoryDevice {
        MemoryDevice::new("NK6-EU-MHA0000A", "438")
    }

    #[tokio::test]
    async fn connect_failure_maps_to_error_kind() {
        let dev = device();
        dev.fail_connect(Some(ConnectFailure::InvalidAuth));
        let err = dev.connect("").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidAuth { .. }));
        assert!(!dev.is_connected());

        dev.fail_connect(None);
        dev.connect("10.0.0.2").await.unwrap();
        assert!(dev.is_connected());
    }

    #[tokio::test]
    async fn commands_require_connection() {
        let dev = device();
        let err = dev.send_command(DeviceCommand::TurnOff).await.unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
    }

    #[tokio::test]
    async fn command_updates_state_and_notifies() {
        let dev = device();
        dev.connect("").await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let _guard = dev.add_update_listener(Arc::new(move |update: &DeviceUpdate| {
            assert_eq!(update.serial, "NK6-EU-MHA0000A");
            s.fetch_add(1, Ordering::SeqCst);
        }));

        dev.send_command(DeviceCommand::set_speed(6).unwrap())
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(dev.state().is_on());
        assert_eq!(dev.state().speed(), Some(6));
        assert_eq!(dev.commands(), vec![DeviceCommand::SetSpeed { speed: 6 }]);
    }

    #[tokio::test]
    async fn monitoring_setter_sends_power_flag() {
        let dev = device();
        dev.connect("").await.unwrap();
        dev.set_continuous_monitoring(true).await.unwrap();

        assert!(dev.continuous_monitoring());
        assert_eq!(
            dev.commands(),
            vec![DeviceCommand::SetContinuousMonitoring {
                enabled: true,
                power_on: false
            }]
        );
    }

    #[tokio::test]
    async fn injected_fetch_failures_are_consumed() {
        let dev = device();
        dev.connect("").await.unwrap();
        dev.fail_next_fetches(1);

        assert!(dev.fetch_state().await.is_err());
        assert!(dev.fetch_state().await.is_ok());
        assert_eq!(dev.fetch_count(), 2);
    }

    #[test]
    fn push_state_change_records_previous_value() {
        let dev = device().with_state(
            DeviceState::default().with_product_fields([("nmod", "OFF".to_string())]),
        );
        dev.push_state_change([("nmod", "ON".to_string())]);

        let state = dev.state();
        assert_eq!(
            state.product.get("nmod"),
            Some(&serde_json::json!(["OFF", "ON"]))
        );
        assert_eq!(state.field("nmod"), Some("ON"));
    }

    #[test]
    fn dropped_guard_stops_push_delivery() {
        let dev = device();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let guard = dev.add_update_listener(Arc::new(move |_: &DeviceUpdate| {
            s.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(dev.listener_count(), 1);

        drop(guard);
        dev.push_state_change([("fpwr", "ON".to_string())]);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(dev.listener_count(), 0);
    }
}
