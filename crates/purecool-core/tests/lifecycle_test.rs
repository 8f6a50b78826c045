// Integration tests for the entry lifecycle using in-memory devices.
#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;

use purecool_core::{
    ConnectFailure, CoordinatorConfig, CoreError, DeviceClient, DeviceCommand, DeviceState,
    Entity, EntityRegistry, EntryData, EntryId, EntryManager, EntryOptions, EntryState,
    MemoryDevice, NotReadyKind, PLATFORMS, Platform, PlatformHost, RenderRequest,
    RenderScheduler, RenderTrigger, SetupError,
};

const SERIAL: &str = "NK6-EU-MHA0000A";

// ── Helpers ─────────────────────────────────────────────────────────

/// Records every render request with the device's pull count at that moment.
#[derive(Default)]
struct RecordingScheduler {
    device: Mutex<Option<Arc<MemoryDevice>>>,
    log: Mutex<Vec<(RenderRequest, u32)>>,
}

impl RenderScheduler for RecordingScheduler {
    fn schedule_render(&self, request: RenderRequest) {
        let fetches = self
            .device
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |d| d.fetch_count());
        self.log.lock().unwrap().push((request, fetches));
    }
}

/// Delegates to an `EntityRegistry`, optionally refusing one platform's unload.
struct FlakyHost {
    registry: EntityRegistry,
    refuse_unload: Mutex<Option<Platform>>,
    forwarded: Mutex<Vec<Platform>>,
}

#[async_trait]
impl PlatformHost for FlakyHost {
    async fn forward_setup(
        &self,
        entry_id: EntryId,
        platform: Platform,
        entities: Vec<Entity>,
    ) -> Result<(), CoreError> {
        self.forwarded.lock().unwrap().push(platform);
        self.registry.forward_setup(entry_id, platform, entities).await
    }

    async fn unload(&self, entry_id: EntryId, platform: Platform) -> bool {
        if *self.refuse_unload.lock().unwrap() == Some(platform) {
            return false;
        }
        self.registry.unload(entry_id, platform).await
    }
}

struct Harness {
    manager: EntryManager,
    host: Arc<FlakyHost>,
    scheduler: Arc<RecordingScheduler>,
    device: Arc<Mutex<Option<Arc<MemoryDevice>>>>,
    created: Arc<AtomicUsize>,
}

#[derive(Clone, Default)]
struct DeviceSetup {
    connect_failure: Option<ConnectFailure>,
    fetch_failures: u32,
    monitoring: bool,
    connect_delay: Option<Duration>,
}

fn harness(setup: DeviceSetup) -> Harness {
    let scheduler = Arc::new(RecordingScheduler::default());
    let host = Arc::new(FlakyHost {
        registry: EntityRegistry::new(scheduler.clone()),
        refuse_unload: Mutex::new(None),
        forwarded: Mutex::new(Vec::new()),
    });
    let device: Arc<Mutex<Option<Arc<MemoryDevice>>>> = Arc::default();
    let created_count = Arc::new(AtomicUsize::new(0));

    let factory = {
        let device = Arc::clone(&device);
        let created_count = Arc::clone(&created_count);
        let scheduler = Arc::clone(&scheduler);
        move |data: &EntryData| -> Result<Arc<dyn DeviceClient>, CoreError> {
            let rhtm = if setup.monitoring { "ON" } else { "OFF" };
            let state = DeviceState::default().with_product_fields([
                ("fpwr", "ON".to_string()),
                ("fnsp", "0004".to_string()),
                ("rhtm", rhtm.to_string()),
            ]);
            let created = Arc::new(MemoryDevice::from_entry(data).with_state(state));
            created.fail_connect(setup.connect_failure);
            created.fail_next_fetches(setup.fetch_failures);
            created.set_connect_delay(setup.connect_delay);
            created_count.fetch_add(1, Ordering::SeqCst);
            *device.lock().unwrap() = Some(Arc::clone(&created));
            *scheduler.device.lock().unwrap() = Some(Arc::clone(&created));
            let client: Arc<dyn DeviceClient> = created;
            Ok(client)
        }
    };

    let manager = EntryManager::new(Arc::new(factory), host.clone(), CoordinatorConfig::default());
    Harness {
        manager,
        host,
        scheduler,
        device,
        created: created_count,
    }
}

impl Harness {
    fn add(&self) -> EntryId {
        let data = EntryData::new(SERIAL, SecretString::from("secret".to_string()));
        self.manager.add_entry(data, EntryOptions::default()).unwrap()
    }

    fn device(&self) -> Arc<MemoryDevice> {
        self.device.lock().unwrap().clone().unwrap()
    }

    fn renders(&self) -> Vec<(RenderRequest, u32)> {
        self.scheduler.log.lock().unwrap().clone()
    }
}

// ── Setup ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_setup_forwards_every_platform_once() {
    let h = harness(DeviceSetup::default());
    let id = h.add();

    h.manager.setup(id).await.unwrap();

    assert_eq!(h.manager.state(id), Some(EntryState::Ready));
    assert_eq!(h.host.forwarded.lock().unwrap().len(), PLATFORMS.len());
    assert_eq!(h.host.registry.loaded_platforms(id), PLATFORMS.to_vec());
    assert_eq!(h.host.registry.len(), 12);

    let runtime = h.manager.runtime(id).unwrap();
    assert!(runtime.device.is_connected());
    assert!(runtime.coordinator.snapshot().is_some());
    assert!(runtime.coordinator.is_running().await);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_first_refresh_precedes_every_render() {
    let h = harness(DeviceSetup::default());
    let id = h.add();
    h.manager.setup(id).await.unwrap();

    let renders = h.renders();
    assert!(!renders.is_empty());
    for (request, fetches) in &renders {
        assert!(*fetches >= 1, "{} rendered before first pull", request.unique_id);
    }
    assert_eq!(
        renders
            .iter()
            .filter(|(r, _)| r.trigger == RenderTrigger::Added)
            .count(),
        12
    );

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_invalid_auth_is_not_ready() {
    let h = harness(DeviceSetup {
        connect_failure: Some(ConnectFailure::InvalidAuth),
        ..DeviceSetup::default()
    });
    let id = h.add();

    let err = h.manager.setup(id).await.unwrap_err();
    match err {
        SetupError::NotReady { kind, .. } => assert_eq!(kind, NotReadyKind::InvalidAuth),
        other => panic!("expected not ready, got {other:?}"),
    }

    assert!(matches!(h.manager.state(id), Some(EntryState::NotReady { .. })));
    assert!(h.host.forwarded.lock().unwrap().is_empty());
    assert!(h.manager.runtime(id).is_none());
    assert!(h.renders().is_empty());
}

#[tokio::test]
async fn test_cannot_connect_is_not_ready() {
    let h = harness(DeviceSetup {
        connect_failure: Some(ConnectFailure::CannotConnect),
        ..DeviceSetup::default()
    });
    let id = h.add();

    let err = h.manager.setup(id).await.unwrap_err();
    assert!(err.is_not_ready());
    assert!(h.host.forwarded.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_other_connect_errors_propagate() {
    let h = harness(DeviceSetup {
        connect_failure: Some(ConnectFailure::NotConnected),
        ..DeviceSetup::default()
    });
    let id = h.add();

    let err = h.manager.setup(id).await.unwrap_err();
    assert!(matches!(err, SetupError::Failed(CoreError::NotConnected)));
    assert!(matches!(h.manager.state(id), Some(EntryState::Failed { .. })));
    assert!(h.host.forwarded.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_refresh_releases_device() {
    let h = harness(DeviceSetup {
        fetch_failures: 1,
        ..DeviceSetup::default()
    });
    let id = h.add();

    let err = h.manager.setup(id).await.unwrap_err();
    assert!(matches!(err, SetupError::Failed(CoreError::UpdateFailed { .. })));
    assert!(h.manager.runtime(id).is_none());
    assert!(!h.device().is_connected());
    assert!(h.host.forwarded.lock().unwrap().is_empty());
    assert!(h.renders().is_empty());
}

// ── Options ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_setup_persists_device_monitoring_flag() {
    let h = harness(DeviceSetup {
        monitoring: true,
        ..DeviceSetup::default()
    });
    let id = h.add();
    assert!(!h.manager.options(id).unwrap().continuous_monitoring);

    h.manager.setup(id).await.unwrap();

    assert!(h.manager.options(id).unwrap().continuous_monitoring);
    assert!(h.device().commands().is_empty());
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_option_change_calls_setter_once_without_refresh() {
    let h = harness(DeviceSetup::default());
    let id = h.add();
    h.manager.setup(id).await.unwrap();
    let device = h.device();
    let fetches = device.fetch_count();

    h.manager
        .update_options(
            id,
            EntryOptions {
                continuous_monitoring: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        device.commands(),
        vec![DeviceCommand::SetContinuousMonitoring {
            enabled: true,
            power_on: true,
        }]
    );
    assert_eq!(device.fetch_count(), fetches);
    assert!(device.continuous_monitoring());
    assert!(h.manager.options(id).unwrap().continuous_monitoring);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_options_before_setup_are_only_stored() {
    let h = harness(DeviceSetup::default());
    let id = h.add();

    h.manager
        .update_options(
            id,
            EntryOptions {
                continuous_monitoring: true,
            },
        )
        .await
        .unwrap();

    assert!(h.manager.options(id).unwrap().continuous_monitoring);
    assert!(h.device.lock().unwrap().is_none());
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unload_releases_everything() {
    let h = harness(DeviceSetup::default());
    let id = h.add();
    h.manager.setup(id).await.unwrap();
    let runtime = h.manager.runtime(id).unwrap();
    let device = h.device();

    assert!(h.manager.unload(id).await);

    assert_eq!(h.manager.state(id), Some(EntryState::TornDown));
    assert!(h.manager.runtime(id).is_none());
    assert!(h.host.registry.is_empty());
    assert_eq!(device.listener_count(), 0);
    assert_eq!(runtime.coordinator.listener_count(), 0);
    assert!(!runtime.coordinator.is_running().await);
    assert!(!device.is_connected());

    // Options no longer reach the released device.
    h.manager
        .update_options(
            id,
            EntryOptions {
                continuous_monitoring: true,
            },
        )
        .await
        .unwrap();
    assert!(device.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_platform_unload_keeps_state() {
    let h = harness(DeviceSetup::default());
    let id = h.add();
    h.manager.setup(id).await.unwrap();
    *h.host.refuse_unload.lock().unwrap() = Some(Platform::Sensor);

    assert!(!h.manager.unload(id).await);

    assert!(matches!(h.manager.state(id), Some(EntryState::Degraded { .. })));
    let runtime = h.manager.runtime(id).unwrap();
    assert!(runtime.device.is_connected());
    assert!(runtime.coordinator.is_running().await);

    // The retry succeeds once the platform cooperates.
    *h.host.refuse_unload.lock().unwrap() = None;
    assert!(h.manager.unload(id).await);
    assert!(h.manager.runtime(id).is_none());
    assert!(h.host.registry.is_empty());
}

// ── Dual-channel delivery ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_push_and_pull_in_same_tick_both_render() {
    let (tx, mut rx) = mpsc::unbounded_channel::<RenderRequest>();
    let registry = Arc::new(EntityRegistry::new(Arc::new(tx)));
    let device = Arc::new(MemoryDevice::new(SERIAL, "438"));
    let factory = {
        let device = Arc::clone(&device);
        move |_: &EntryData| -> Result<Arc<dyn DeviceClient>, CoreError> {
            let client: Arc<dyn DeviceClient> = device.clone();
            Ok(client)
        }
    };
    let manager = EntryManager::new(Arc::new(factory), registry.clone(), CoordinatorConfig::default());
    let id = manager
        .add_entry(
            EntryData::new(SERIAL, SecretString::from("secret".to_string())),
            EntryOptions::default(),
        )
        .unwrap();
    manager.setup(id).await.unwrap();
    while rx.try_recv().is_ok() {}

    let coordinator = manager.runtime(id).unwrap().coordinator.clone();
    device.push_state_change([("fpwr", "ON".to_string())]);
    coordinator.refresh().await;

    let mut fan_triggers = Vec::new();
    while let Ok(request) = rx.try_recv() {
        if request.unique_id == SERIAL {
            fan_triggers.push(request.trigger);
        }
    }
    assert_eq!(fan_triggers, vec![RenderTrigger::Device, RenderTrigger::Coordinator]);

    let fan = registry.get(SERIAL).unwrap();
    assert!(fan.as_fan().unwrap().fan_state().is_on);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycle_marks_entities_unavailable() {
    let (tx, _rx) = mpsc::unbounded_channel::<RenderRequest>();
    let registry = Arc::new(EntityRegistry::new(Arc::new(tx)));
    let device = Arc::new(MemoryDevice::new(SERIAL, "438"));
    device.set_environment(
        json!({ "hact": "0045" })
            .as_object()
            .cloned()
            .unwrap(),
    );
    let factory = {
        let device = Arc::clone(&device);
        move |_: &EntryData| -> Result<Arc<dyn DeviceClient>, CoreError> {
            let client: Arc<dyn DeviceClient> = device.clone();
            Ok(client)
        }
    };
    let manager = EntryManager::new(Arc::new(factory), registry.clone(), CoordinatorConfig::default());
    let id = manager
        .add_entry(
            EntryData::new(SERIAL, SecretString::from("secret".to_string())),
            EntryOptions::default(),
        )
        .unwrap();
    manager.setup(id).await.unwrap();

    let humidity_id = format!("{SERIAL}-humidity");
    let rendered = registry.render(&humidity_id).unwrap();
    assert!(rendered.available);
    assert_eq!(rendered.name, "Dyson Pure Cool Humidity");

    device.fail_next_fetches(1);
    manager.runtime(id).unwrap().coordinator.refresh().await;
    let stale = registry.render(&humidity_id).unwrap();
    assert!(!stale.available);
    assert_eq!(stale.value, rendered.value);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_detached_entity_is_never_called_back() {
    let flag = Arc::new(AtomicBool::new(false));
    let h = harness(DeviceSetup::default());
    let id = h.add();
    h.manager.setup(id).await.unwrap();
    let device = h.device();
    let coordinator = h.manager.runtime(id).unwrap().coordinator.clone();

    assert!(h.manager.unload(id).await);
    let before = h.renders().len();

    let f = Arc::clone(&flag);
    let _probe = coordinator.add_listener(move |_| f.store(true, Ordering::SeqCst));
    device.push_state_change([("fpwr", "OFF".to_string())]);
    coordinator.refresh().await;

    assert_eq!(h.renders().len(), before);
    assert!(flag.load(Ordering::SeqCst));
}

// ── Overlapping lifecycle calls ─────────────────────────────────────

fn slow_connect() -> DeviceSetup {
    DeviceSetup {
        connect_delay: Some(Duration::from_millis(50)),
        ..DeviceSetup::default()
    }
}

fn assert_single_ready_runtime(h: &Harness, id: EntryId) {
    assert_eq!(h.manager.state(id), Some(EntryState::Ready));
    assert_eq!(h.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.host.registry.loaded_platforms(id), PLATFORMS.to_vec());
    assert_eq!(h.host.registry.len(), 12);

    let runtime = h.manager.runtime(id).unwrap();
    let device: Arc<dyn DeviceClient> = h.device();
    assert!(runtime.device.is_connected());
    assert!(Arc::ptr_eq(&runtime.device, &device));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_setup_keeps_one_runtime() {
    let h = harness(slow_connect());
    let id = h.add();

    let (first, second) = tokio::join!(h.manager.setup(id), h.manager.setup(id));

    first.unwrap();
    assert!(matches!(
        second,
        Err(SetupError::Failed(CoreError::SetupInProgress { .. }))
    ));
    assert_single_ready_runtime(&h, id);

    assert!(h.manager.unload(id).await);
    assert!(!h.device().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_unload_while_connecting_is_refused() {
    let h = harness(slow_connect());
    let id = h.add();

    let (setup, unloaded) = tokio::join!(h.manager.setup(id), h.manager.unload(id));

    setup.unwrap();
    assert!(!unloaded);
    assert_single_ready_runtime(&h, id);

    assert!(h.manager.unload(id).await);
    assert_eq!(h.manager.state(id), Some(EntryState::TornDown));
}

#[tokio::test(start_paused = true)]
async fn test_reload_racing_setup_backs_off() {
    let h = harness(slow_connect());
    let id = h.add();

    let (setup, reload) = tokio::join!(h.manager.setup(id), h.manager.reload(id));

    setup.unwrap();
    assert!(matches!(
        reload,
        Err(SetupError::Failed(CoreError::SetupInProgress { .. }))
    ));
    assert_single_ready_runtime(&h, id);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_while_connecting_keeps_entry() {
    let h = harness(slow_connect());
    let id = h.add();

    let (setup, removed) = tokio::join!(h.manager.setup(id), h.manager.remove_entry(id));

    setup.unwrap();
    assert!(matches!(removed, Err(CoreError::SetupInProgress { .. })));
    assert!(h.manager.entry(id).is_some());
    assert_single_ready_runtime(&h, id);

    h.manager.remove_entry(id).await.unwrap();
    assert!(h.manager.entry(id).is_none());
    assert!(h.host.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_setup_after_not_ready_can_claim_again() {
    let h = harness(DeviceSetup {
        connect_failure: Some(ConnectFailure::CannotConnect),
        ..DeviceSetup::default()
    });
    let id = h.add();

    assert!(h.manager.setup(id).await.unwrap_err().is_not_ready());
    let err = h.manager.setup(id).await.unwrap_err();
    assert!(err.is_not_ready(), "second attempt was blocked: {err:?}");
    assert_eq!(h.created.load(Ordering::SeqCst), 2);
}
