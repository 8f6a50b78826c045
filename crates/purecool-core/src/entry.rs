// ── Entry lifecycle ──
//
// One config entry per physical device. The manager owns the table of
// entries and, for every entry that is set up, exactly one device client
// and one coordinator. Setup and teardown run as an explicit state machine:
//
//   Unconfigured -> Connecting -> Ready -> TornDown
//                       |           |
//                       v           v
//               NotReady/Failed  Degraded

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures_util::future::{join_all, try_join_all};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{CoordinatorConfig, EntryData, EntryOptions};
use crate::coordinator::UpdateCoordinator;
use crate::device::{DeviceClient, DeviceFactory};
use crate::entity::DEVICE_NAME;
use crate::error::{CoreError, NotReadyKind, SetupError};
use crate::platform::{PLATFORMS, PlatformHost, build_entities};

// ── Identity and state ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of one entry, observable through
/// [`EntryManager::subscribe_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Unconfigured,
    Connecting,
    Ready,
    /// Setup should be retried later.
    NotReady { reason: String },
    /// Setup failed with an error outside the retry classification.
    Failed { reason: String },
    /// A platform refused to unload; runtime state was kept.
    Degraded { reason: String },
    TornDown,
}

impl EntryState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// A configured device and its editable options.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub entry_id: EntryId,
    pub title: String,
    pub data: EntryData,
    pub options: EntryOptions,
}

/// What [`EntryManager::import_entry`] did with a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// No entry had this serial; a new one was added.
    Created(EntryId),
    /// The entry for this serial took the new data.
    Updated(EntryId),
    /// The entry for this serial already held the same data.
    Unchanged(EntryId),
}

impl ImportOutcome {
    pub fn entry_id(self) -> EntryId {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Unchanged(id) => id,
        }
    }
}

/// The device client and coordinator owned by a set-up entry.
pub struct EntryRuntime {
    pub device: Arc<dyn DeviceClient>,
    pub coordinator: UpdateCoordinator,
}

struct EntryRecord {
    entry: ConfigEntry,
    state: watch::Sender<EntryState>,
    /// Options changes reach the device only once setup has finished.
    listening: AtomicBool,
}

impl EntryRecord {
    fn transition(&self, next: EntryState) {
        let entry_id = self.entry.entry_id;
        let previous = self.state.send_replace(next);
        debug!(entry_id = %entry_id, from = ?previous, to = ?*self.state.borrow(), "entry state");
    }
}

// ── EntryManager ─────────────────────────────────────────────────────

/// Owns every config entry and its runtime.
pub struct EntryManager {
    factory: Arc<dyn DeviceFactory>,
    host: Arc<dyn PlatformHost>,
    coordinator_config: CoordinatorConfig,
    entries: DashMap<EntryId, EntryRecord>,
    runtime: DashMap<EntryId, Arc<EntryRuntime>>,
}

impl EntryManager {
    pub fn new(
        factory: Arc<dyn DeviceFactory>,
        host: Arc<dyn PlatformHost>,
        coordinator_config: CoordinatorConfig,
    ) -> Self {
        Self {
            factory,
            host,
            coordinator_config,
            entries: DashMap::new(),
            runtime: DashMap::new(),
        }
    }

    // ── Entry table ──────────────────────────────────────────────────

    /// Register a device. One entry per serial.
    pub fn add_entry(&self, data: EntryData, options: EntryOptions) -> Result<EntryId, CoreError> {
        if self.entries.iter().any(|r| r.entry.data.serial == data.serial) {
            return Err(CoreError::AlreadyConfigured {
                serial: data.serial,
            });
        }

        let entry_id = EntryId::new();
        let (state, _) = watch::channel(EntryState::Unconfigured);
        let entry = ConfigEntry {
            entry_id,
            title: format!("{DEVICE_NAME} ({})", data.serial),
            data,
            options,
        };
        info!(entry_id = %entry_id, serial = %entry.data.serial, "entry added");
        self.entries.insert(
            entry_id,
            EntryRecord {
                entry,
                state,
                listening: AtomicBool::new(false),
            },
        );
        Ok(entry_id)
    }

    /// Add a device, or bring the entry that already has its serial up to
    /// date. A loaded entry whose data changed is reloaded so the new host
    /// and credential take effect.
    pub async fn import_entry(&self, data: EntryData) -> Result<ImportOutcome, SetupError> {
        let existing = self
            .entries
            .iter()
            .find(|r| r.entry.data.serial == data.serial)
            .map(|r| *r.key());
        let Some(entry_id) = existing else {
            return self
                .add_entry(data, EntryOptions::default())
                .map(ImportOutcome::Created)
                .map_err(SetupError::Failed);
        };

        let changed = {
            let mut record = self.entries.get_mut(&entry_id).ok_or_else(|| {
                SetupError::Failed(CoreError::EntryNotFound {
                    entry_id: entry_id.to_string(),
                })
            })?;
            if same_data(&record.entry.data, &data) {
                false
            } else {
                record.entry.data = data;
                true
            }
        };
        if !changed {
            debug!(entry_id = %entry_id, "import matches stored entry");
            return Ok(ImportOutcome::Unchanged(entry_id));
        }

        info!(entry_id = %entry_id, "entry data updated from import");
        if self.runtime.contains_key(&entry_id) {
            self.reload(entry_id).await?;
        }
        Ok(ImportOutcome::Updated(entry_id))
    }

    /// Unload if needed, then forget the entry.
    pub async fn remove_entry(&self, entry_id: EntryId) -> Result<(), CoreError> {
        self.require(entry_id)?;
        if self.runtime.contains_key(&entry_id) && !self.unload(entry_id).await {
            return Err(CoreError::Platform {
                platform: "all".into(),
                message: format!("entry {entry_id} could not be unloaded"),
            });
        }

        // Checked under the shard write lock, which a setup claim also needs.
        let removed = self.entries.remove_if(&entry_id, |_, record| {
            !matches!(*record.state.borrow(), EntryState::Connecting)
                && !self.runtime.contains_key(&entry_id)
        });
        if removed.is_none() {
            return Err(CoreError::SetupInProgress {
                entry_id: entry_id.to_string(),
            });
        }
        info!(entry_id = %entry_id, "entry removed");
        Ok(())
    }

    pub fn entry(&self, entry_id: EntryId) -> Option<ConfigEntry> {
        self.entries.get(&entry_id).map(|r| r.entry.clone())
    }

    pub fn entry_ids(&self) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.entries.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    pub fn options(&self, entry_id: EntryId) -> Option<EntryOptions> {
        self.entries.get(&entry_id).map(|r| r.entry.options)
    }

    pub fn state(&self, entry_id: EntryId) -> Option<EntryState> {
        self.entries.get(&entry_id).map(|r| r.state.borrow().clone())
    }

    pub fn subscribe_state(&self, entry_id: EntryId) -> Option<watch::Receiver<EntryState>> {
        self.entries.get(&entry_id).map(|r| r.state.subscribe())
    }

    pub fn runtime(&self, entry_id: EntryId) -> Option<Arc<EntryRuntime>> {
        self.runtime.get(&entry_id).map(|r| Arc::clone(r.value()))
    }

    fn require(&self, entry_id: EntryId) -> Result<(), CoreError> {
        if self.entries.contains_key(&entry_id) {
            Ok(())
        } else {
            Err(CoreError::EntryNotFound {
                entry_id: entry_id.to_string(),
            })
        }
    }

    fn is_connecting(&self, entry_id: EntryId) -> bool {
        self.entries
            .get(&entry_id)
            .is_some_and(|r| matches!(*r.state.borrow(), EntryState::Connecting))
    }

    fn transition(&self, entry_id: EntryId, next: EntryState) {
        if let Some(record) = self.entries.get(&entry_id) {
            record.transition(next);
        }
    }

    // ── Setup ────────────────────────────────────────────────────────

    /// Connect, pull once, and forward every platform.
    ///
    /// Credential and connectivity failures come back as
    /// [`SetupError::NotReady`]; every other error is returned unchanged in
    /// [`SetupError::Failed`]. Nothing is left registered on failure.
    ///
    /// Only one setup runs per entry. A call that finds the entry already
    /// `Connecting` fails with [`CoreError::SetupInProgress`], and one that
    /// finds it set up fails with [`CoreError::AlreadySetUp`]. Neither
    /// touches the running setup or its state.
    pub async fn setup(&self, entry_id: EntryId) -> Result<(), SetupError> {
        let entry = self.claim_setup(entry_id).map_err(SetupError::Failed)?;
        match self.try_setup(&entry).await {
            Ok(()) => {
                if let Some(record) = self.entries.get(&entry_id) {
                    record.listening.store(true, Ordering::SeqCst);
                }
                self.transition(entry_id, EntryState::Ready);
                info!(entry_id = %entry_id, serial = %entry.data.serial, "entry ready");
                Ok(())
            }
            Err(e) => Err(self.classify_failure(entry_id, &entry.data.serial, e)),
        }
    }

    /// Move the entry to `Connecting` if nothing else owns it. The check and
    /// the transition happen under the state channel's lock.
    fn claim_setup(&self, entry_id: EntryId) -> Result<ConfigEntry, CoreError> {
        let record = self
            .entries
            .get(&entry_id)
            .ok_or_else(|| CoreError::EntryNotFound {
                entry_id: entry_id.to_string(),
            })?;

        let mut claim = Ok(());
        record.state.send_if_modified(|state| {
            if matches!(state, EntryState::Connecting) {
                claim = Err(CoreError::SetupInProgress {
                    entry_id: entry_id.to_string(),
                });
                false
            } else if self.runtime.contains_key(&entry_id) {
                claim = Err(CoreError::AlreadySetUp {
                    entry_id: entry_id.to_string(),
                });
                false
            } else {
                *state = EntryState::Connecting;
                true
            }
        });
        claim?;

        debug!(entry_id = %entry_id, to = ?EntryState::Connecting, "entry state");
        Ok(record.entry.clone())
    }

    async fn try_setup(&self, entry: &ConfigEntry) -> Result<(), CoreError> {
        let entry_id = entry.entry_id;
        let data = &entry.data;

        let device = self.factory.create(data)?;
        device.connect(&data.host).await?;

        // Persist the device's monitoring flag before the options listener
        // is armed, so this write does not echo back to the device.
        if let Some(mut record) = self.entries.get_mut(&entry_id) {
            record.entry.options.continuous_monitoring = device.continuous_monitoring();
        }

        let coordinator =
            UpdateCoordinator::new(self.coordinator_config.clone(), Arc::clone(&device));
        self.runtime.insert(
            entry_id,
            Arc::new(EntryRuntime {
                device: Arc::clone(&device),
                coordinator: coordinator.clone(),
            }),
        );

        if let Err(e) = coordinator.config_entry_first_refresh().await {
            self.release_runtime(entry_id).await;
            return Err(e);
        }

        let forwards = PLATFORMS.map(|platform| {
            let entities = build_entities(platform, &device, &coordinator);
            self.host.forward_setup(entry_id, platform, entities)
        });
        if let Err(e) = try_join_all(forwards).await {
            join_all(PLATFORMS.map(|platform| self.host.unload(entry_id, platform))).await;
            self.release_runtime(entry_id).await;
            return Err(e);
        }

        coordinator.start().await;
        Ok(())
    }

    fn classify_failure(&self, entry_id: EntryId, serial: &str, e: CoreError) -> SetupError {
        match e.not_ready_kind() {
            Some(kind) => {
                match kind {
                    NotReadyKind::InvalidAuth => {
                        error!(entry_id = %entry_id, serial, error = %e, "connection refused - bad credential");
                    }
                    NotReadyKind::CannotConnect => {
                        error!(entry_id = %entry_id, serial, error = %e, "connection refused");
                    }
                }
                let message = e.to_string();
                self.transition(
                    entry_id,
                    EntryState::NotReady {
                        reason: message.clone(),
                    },
                );
                SetupError::NotReady { kind, message }
            }
            None => {
                error!(entry_id = %entry_id, serial, error = %e, "entry setup failed");
                self.transition(
                    entry_id,
                    EntryState::Failed {
                        reason: e.to_string(),
                    },
                );
                SetupError::Failed(e)
            }
        }
    }

    async fn release_runtime(&self, entry_id: EntryId) {
        if let Some((_, runtime)) = self.runtime.remove(&entry_id) {
            runtime.coordinator.shutdown().await;
            runtime.device.disconnect().await;
        }
    }

    // ── Options ──────────────────────────────────────────────────────

    /// Store new options and, once the entry is set up, push the
    /// continuous-monitoring flag to the device. Does not trigger a refresh.
    pub async fn update_options(
        &self,
        entry_id: EntryId,
        options: EntryOptions,
    ) -> Result<(), CoreError> {
        let listening = {
            let mut record = self
                .entries
                .get_mut(&entry_id)
                .ok_or_else(|| CoreError::EntryNotFound {
                    entry_id: entry_id.to_string(),
                })?;
            record.entry.options = options;
            record.listening.load(Ordering::SeqCst)
        };
        if !listening {
            return Ok(());
        }

        let Some(runtime) = self.runtime(entry_id) else {
            return Ok(());
        };
        debug!(
            entry_id = %entry_id,
            continuous_monitoring = options.continuous_monitoring,
            "applying options"
        );
        runtime
            .device
            .set_continuous_monitoring(options.continuous_monitoring)
            .await
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Unload every platform concurrently. Only when all of them succeed is
    /// the runtime released; otherwise it stays in place for a retry and the
    /// entry becomes [`EntryState::Degraded`].
    pub async fn unload(&self, entry_id: EntryId) -> bool {
        if self.is_connecting(entry_id) {
            warn!(entry_id = %entry_id, "unload requested while setup is running");
            return false;
        }
        if !self.runtime.contains_key(&entry_id) {
            warn!(entry_id = %entry_id, "unload requested for an entry that is not set up");
            return false;
        }

        let results = join_all(PLATFORMS.map(|platform| self.host.unload(entry_id, platform))).await;
        let failed: Vec<String> = PLATFORMS
            .iter()
            .zip(&results)
            .filter(|(_, ok)| !**ok)
            .map(|(platform, _)| platform.to_string())
            .collect();

        if !failed.is_empty() {
            let reason = format!("platform unload failed: {}", failed.join(", "));
            warn!(entry_id = %entry_id, %reason, "entry left loaded");
            self.transition(entry_id, EntryState::Degraded { reason });
            return false;
        }

        if let Some(record) = self.entries.get(&entry_id) {
            record.listening.store(false, Ordering::SeqCst);
        }
        self.release_runtime(entry_id).await;
        self.transition(entry_id, EntryState::TornDown);
        info!(entry_id = %entry_id, "entry unloaded");
        true
    }

    /// Unload, then set up again.
    pub async fn reload(&self, entry_id: EntryId) -> Result<(), SetupError> {
        if self.is_connecting(entry_id) {
            return Err(SetupError::Failed(CoreError::SetupInProgress {
                entry_id: entry_id.to_string(),
            }));
        }
        if self.runtime.contains_key(&entry_id) && !self.unload(entry_id).await {
            return Err(SetupError::Failed(CoreError::Platform {
                platform: "all".into(),
                message: format!("entry {entry_id} could not be unloaded"),
            }));
        }
        self.setup(entry_id).await
    }

    /// Unload every set-up entry. Returns how many unloaded cleanly.
    pub async fn shutdown(&self) -> usize {
        let loaded: Vec<EntryId> = self.runtime.iter().map(|r| *r.key()).collect();
        let mut unloaded = 0;
        for entry_id in loaded {
            if self.unload(entry_id).await {
                unloaded += 1;
            }
        }
        unloaded
    }
}

fn same_data(stored: &EntryData, imported: &EntryData) -> bool {
    stored.serial == imported.serial
        && stored.device_type == imported.device_type
        && stored.host == imported.host
        && stored.credential.expose_secret() == imported.credential.expose_secret()
}
