// ── Update coordinator ──
//
// One periodic pull per device, shared by every entity of that device.
// Each completed cycle replaces the snapshot wholesale (or keeps the last
// good one on failure) and then notifies every attached listener once.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::device::DeviceClient;
use crate::error::CoreError;
use crate::listener::{Callback, ListenerGuard, ListenerSet};
use crate::model::DeviceState;
use crate::stream::SnapshotStream;

// ── Snapshot and status ──────────────────────────────────────────────

/// Result of the last successful pull.
#[derive(Debug, Clone)]
pub struct CoordinatorSnapshot {
    pub state: Arc<DeviceState>,
    pub refreshed_at: DateTime<Utc>,
    /// Number of successful pulls so far, starting at 1.
    pub sequence: u64,
}

/// What a completed cycle reports to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success { sequence: u64 },
    Failed { message: String, consecutive_failures: u32 },
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Health of the refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStatus {
    pub last_update_success: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Completed cycles, successful or not.
    pub cycles: u64,
}

// ── UpdateCoordinator ────────────────────────────────────────────────

/// Periodic refresh for a single device.
///
/// Cheaply cloneable. The background loop holds a clone, so a started
/// coordinator must be stopped with [`shutdown()`](Self::shutdown).
#[derive(Clone)]
pub struct UpdateCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    device: Arc<dyn DeviceClient>,
    snapshot: watch::Sender<Option<Arc<CoordinatorSnapshot>>>,
    status: watch::Sender<RefreshStatus>,
    listeners: ListenerSet<RefreshOutcome>,
    /// Serializes cycles so a manual refresh never overlaps a tick.
    cycle_lock: Mutex<()>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateCoordinator {
    /// Create a coordinator for `device`. Does not pull; call
    /// [`config_entry_first_refresh()`](Self::config_entry_first_refresh)
    /// and then [`start()`](Self::start).
    pub fn new(config: CoordinatorConfig, device: Arc<dyn DeviceClient>) -> Self {
        let (snapshot, _) = watch::channel(None);
        let (status, _) = watch::channel(RefreshStatus::default());
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                device,
                snapshot,
                status,
                listeners: ListenerSet::new(),
                cycle_lock: Mutex::new(()),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn device(&self) -> &Arc<dyn DeviceClient> {
        &self.inner.device
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Pull once, immediately, and fail with the underlying error if the
    /// pull fails. Used during entry setup so connection problems surface
    /// as a setup failure.
    pub async fn config_entry_first_refresh(&self) -> Result<Arc<CoordinatorSnapshot>, CoreError> {
        self.run_cycle().await.0
    }

    /// Run one cycle. Failures are recorded, not returned: the previous
    /// snapshot stays in place and listeners still hear about the cycle.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.run_cycle().await.1
    }

    async fn run_cycle(&self) -> (Result<Arc<CoordinatorSnapshot>, CoreError>, RefreshOutcome) {
        let _cycle = self.inner.cycle_lock.lock().await;
        let started = Instant::now();

        let result = self.pull().await;
        let outcome = match &result {
            Ok(snapshot) => {
                self.record_success(snapshot);
                debug!(
                    coordinator = %self.name(),
                    serial = %self.inner.device.serial(),
                    sequence = snapshot.sequence,
                    elapsed = ?started.elapsed(),
                    "refresh complete"
                );
                RefreshOutcome::Success {
                    sequence: snapshot.sequence,
                }
            }
            Err(e) => {
                let consecutive_failures = self.record_failure(e);
                warn!(
                    coordinator = %self.name(),
                    serial = %self.inner.device.serial(),
                    error = %e,
                    consecutive_failures,
                    "refresh failed"
                );
                RefreshOutcome::Failed {
                    message: e.to_string(),
                    consecutive_failures,
                }
            }
        };

        self.inner.listeners.notify(&outcome);
        (result, outcome)
    }

    async fn pull(&self) -> Result<Arc<CoordinatorSnapshot>, CoreError> {
        let timeout = self.inner.config.refresh_timeout;
        let state = tokio::time::timeout(timeout, self.inner.device.fetch_state())
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })??;

        let sequence = self
            .inner
            .snapshot
            .borrow()
            .as_ref()
            .map_or(1, |prev| prev.sequence + 1);

        Ok(Arc::new(CoordinatorSnapshot {
            state,
            refreshed_at: Utc::now(),
            sequence,
        }))
    }

    fn record_success(&self, snapshot: &Arc<CoordinatorSnapshot>) {
        self.inner.snapshot.send_replace(Some(Arc::clone(snapshot)));
        self.inner.status.send_modify(|status| {
            if status.consecutive_failures > 0 {
                info!(
                    coordinator = %self.inner.config.name,
                    failures = status.consecutive_failures,
                    "refresh recovered"
                );
            }
            status.last_update_success = true;
            status.consecutive_failures = 0;
            status.last_error = None;
            status.last_success_at = Some(snapshot.refreshed_at);
            status.cycles += 1;
        });
    }

    fn record_failure(&self, error: &CoreError) -> u32 {
        let mut failures = 0;
        self.inner.status.send_modify(|status| {
            status.last_update_success = false;
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.last_error = Some(error.to_string());
            status.cycles += 1;
            failures = status.consecutive_failures;
        });
        failures
    }

    // ── Background loop ──────────────────────────────────────────────

    /// Start the periodic refresh loop. No-op when already running.
    pub async fn start(&self) {
        let mut task = self.inner.task.lock().await;
        if task.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }
        let cancel = self.inner.cancel.clone();
        *task = Some(tokio::spawn(refresh_task(self.clone(), cancel)));
        debug!(
            coordinator = %self.name(),
            interval_secs = self.inner.config.update_interval.as_secs(),
            "refresh loop started"
        );
    }

    /// Stop the loop and wait for an in-flight cycle to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
            debug!(coordinator = %self.name(), "refresh loop stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // ── Listeners and observation ────────────────────────────────────

    /// Call `callback` after every completed cycle until the guard drops.
    pub fn add_listener(
        &self,
        callback: impl Fn(&RefreshOutcome) + Send + Sync + 'static,
    ) -> ListenerGuard {
        self.inner.listeners.add(callback)
    }

    pub fn add_shared_listener(&self, callback: Callback<RefreshOutcome>) -> ListenerGuard {
        self.inner.listeners.add_shared(callback)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn snapshot(&self) -> Option<Arc<CoordinatorSnapshot>> {
        self.inner.snapshot.borrow().clone()
    }

    /// State from the last successful pull.
    pub fn data(&self) -> Option<Arc<DeviceState>> {
        self.snapshot().map(|s| Arc::clone(&s.state))
    }

    pub fn last_update_success(&self) -> bool {
        self.inner.status.borrow().last_update_success
    }

    pub fn status(&self) -> RefreshStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<RefreshStatus> {
        self.inner.status.subscribe()
    }

    /// Observe snapshot replacements.
    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.inner.snapshot.subscribe())
    }
}

async fn refresh_task(coordinator: UpdateCoordinator, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(coordinator.inner.config.update_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                coordinator.refresh().await;
            }
        }
    }
}
