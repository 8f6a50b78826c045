// purecool-core: Device synchronization core between a Dyson Pure Cool client and its views.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod entity;
pub mod entry;
pub mod error;
pub mod listener;
pub mod model;
pub mod platform;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{CoordinatorConfig, EntryData, EntryOptions, DEFAULT_DEVICE_TYPE, DOMAIN};
pub use coordinator::{CoordinatorSnapshot, RefreshOutcome, RefreshStatus, UpdateCoordinator};
pub use device::{ConnectFailure, DeviceClient, DeviceFactory, DeviceUpdate, MemoryDevice};
pub use entity::{
    DeviceInfo, Entity, EntityAttachment, EntityBase, EntityValue, RenderRequest, RenderScheduler,
    RenderTrigger, RenderedState, ViewEntity,
};
pub use entry::{ConfigEntry, EntryId, EntryManager, EntryRuntime, EntryState, ImportOutcome};
pub use error::{CoreError, NotReadyKind, SetupError};
pub use listener::{ListenerGuard, ListenerSet};
pub use model::{DeviceCommand, DeviceState, Direction, PresetMode};
pub use platform::{EntityRegistry, PLATFORMS, Platform, PlatformHost};
pub use stream::SnapshotStream;
