// ── View entities ──
//
// Many entities per device, each a read-only view over the device's merged
// state. Every entity listens on two channels: device push updates and
// coordinator refresh cycles. Either one schedules a render on its own;
// nothing is coalesced, so the latest state simply wins.

mod fan;
mod number;
mod sensor;
mod switch;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::DOMAIN;
use crate::coordinator::UpdateCoordinator;
use crate::device::{DeviceClient, DeviceUpdate};
use crate::listener::ListenerGuard;
use crate::model::DeviceState;
use crate::platform::Platform;

pub use fan::{FanEntity, FanState};
pub use number::{OscillationBound, OscillationBoundary};
pub use sensor::{SensorDeviceClass, SensorEntity, SensorKind, StateClass};
pub use switch::NightModeSwitch;

/// Display name shared by every entity of a device.
pub const DEVICE_NAME: &str = "Dyson Pure Cool";
pub const MANUFACTURER: &str = "Dyson";

// ── Host-facing metadata ─────────────────────────────────────────────

/// Device metadata surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// `(namespace, serial)` pairs.
    pub identifiers: BTreeSet<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    /// The serial again; the device reports no separate model name.
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityCategory {
    Config,
    Diagnostic,
}

/// Current value of an entity, by platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntityValue {
    Fan(FanState),
    Sensor(Option<f64>),
    Switch(bool),
    Number(Option<u16>),
}

/// Everything a host needs to draw one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedState {
    pub unique_id: String,
    pub name: String,
    pub available: bool,
    pub icon: Option<&'static str>,
    pub category: Option<EntityCategory>,
    pub value: EntityValue,
    pub attributes: BTreeMap<&'static str, serde_json::Value>,
}

// ── Render scheduling ────────────────────────────────────────────────

/// Which channel asked for a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RenderTrigger {
    /// The entity was just added to its platform.
    Added,
    /// Unsolicited device state change.
    Device,
    /// Completed coordinator cycle.
    Coordinator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub unique_id: String,
    pub trigger: RenderTrigger,
}

/// Receives render requests. Must not block: it is called from inside
/// listener callbacks.
pub trait RenderScheduler: Send + Sync {
    fn schedule_render(&self, request: RenderRequest);
}

impl RenderScheduler for mpsc::UnboundedSender<RenderRequest> {
    fn schedule_render(&self, request: RenderRequest) {
        // A closed receiver means the host is gone; nothing left to draw.
        let _ = self.send(request);
    }
}

// ── EntityBase ───────────────────────────────────────────────────────

/// Identity and data access shared by all entity kinds.
#[derive(Clone)]
pub struct EntityBase {
    device: Arc<dyn DeviceClient>,
    coordinator: UpdateCoordinator,
    sub_name: Option<String>,
    sub_id: Option<String>,
}

impl EntityBase {
    pub fn new(
        device: Arc<dyn DeviceClient>,
        coordinator: UpdateCoordinator,
        sub_name: Option<&str>,
        sub_id: Option<&str>,
    ) -> Self {
        Self {
            device,
            coordinator,
            sub_name: sub_name.map(str::to_owned),
            sub_id: sub_id.map(str::to_owned),
        }
    }

    /// `"Dyson Pure Cool"`, suffixed with the sub-name when there is one.
    pub fn name(&self) -> String {
        match &self.sub_name {
            Some(sub) => format!("{DEVICE_NAME} {sub}"),
            None => DEVICE_NAME.to_owned(),
        }
    }

    /// The device serial, suffixed with `-<sub_id>` when there is one.
    pub fn unique_id(&self) -> String {
        let serial = self.device.serial();
        match &self.sub_id {
            Some(sub) => format!("{serial}-{sub}"),
            None => serial.to_owned(),
        }
    }

    pub fn sub_id(&self) -> Option<&str> {
        self.sub_id.as_deref()
    }

    pub fn device_info(&self) -> DeviceInfo {
        let serial = self.device.serial().to_owned();
        DeviceInfo {
            identifiers: BTreeSet::from([(DOMAIN.to_owned(), serial.clone())]),
            name: DEVICE_NAME.to_owned(),
            manufacturer: MANUFACTURER.to_owned(),
            model: serial,
        }
    }

    pub fn device(&self) -> &Arc<dyn DeviceClient> {
        &self.device
    }

    pub fn coordinator(&self) -> &UpdateCoordinator {
        &self.coordinator
    }

    /// Latest merged state, whichever channel delivered it.
    pub fn state(&self) -> Arc<DeviceState> {
        self.device.state()
    }

    /// False while the coordinator's last cycle failed.
    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    /// Subscribe to both channels. Each signal becomes one render request
    /// for this entity. Dropping the attachment unsubscribes from both.
    pub fn attach(&self, scheduler: Arc<dyn RenderScheduler>) -> EntityAttachment {
        let unique_id = self.unique_id();

        let device_guard = {
            let scheduler = Arc::clone(&scheduler);
            let unique_id = unique_id.clone();
            self.device
                .add_update_listener(Arc::new(move |_: &DeviceUpdate| {
                    scheduler.schedule_render(RenderRequest {
                        unique_id: unique_id.clone(),
                        trigger: RenderTrigger::Device,
                    });
                }))
        };

        let coordinator_guard = {
            let unique_id = unique_id.clone();
            self.coordinator.add_listener(move |_| {
                scheduler.schedule_render(RenderRequest {
                    unique_id: unique_id.clone(),
                    trigger: RenderTrigger::Coordinator,
                });
            })
        };

        EntityAttachment {
            unique_id,
            _device: device_guard,
            _coordinator: coordinator_guard,
        }
    }
}

/// Both listener registrations of an attached entity.
#[derive(Debug)]
pub struct EntityAttachment {
    unique_id: String,
    _device: ListenerGuard,
    _coordinator: ListenerGuard,
}

impl EntityAttachment {
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Release both registrations now.
    pub fn detach(self) {}
}

// ── ViewEntity ───────────────────────────────────────────────────────

/// Common surface of all entity kinds.
pub trait ViewEntity: Send + Sync {
    fn base(&self) -> &EntityBase;

    fn platform(&self) -> Platform;

    fn value(&self) -> EntityValue;

    fn icon(&self) -> Option<&'static str> {
        None
    }

    fn category(&self) -> Option<EntityCategory> {
        None
    }

    fn available(&self) -> bool {
        self.base().available()
    }

    fn attributes(&self) -> BTreeMap<&'static str, serde_json::Value> {
        BTreeMap::new()
    }

    fn render(&self) -> RenderedState {
        RenderedState {
            unique_id: self.base().unique_id(),
            name: self.base().name(),
            available: self.available(),
            icon: self.icon(),
            category: self.category(),
            value: self.value(),
            attributes: self.attributes(),
        }
    }
}

/// Any entity this crate builds.
#[derive(Clone)]
pub enum Entity {
    Fan(FanEntity),
    Sensor(SensorEntity),
    Switch(NightModeSwitch),
    Number(OscillationBoundary),
}

impl Entity {
    fn view(&self) -> &dyn ViewEntity {
        match self {
            Self::Fan(e) => e,
            Self::Sensor(e) => e,
            Self::Switch(e) => e,
            Self::Number(e) => e,
        }
    }

    pub fn as_fan(&self) -> Option<&FanEntity> {
        match self {
            Self::Fan(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<&NightModeSwitch> {
        match self {
            Self::Switch(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&OscillationBoundary> {
        match self {
            Self::Number(e) => Some(e),
            _ => None,
        }
    }
}

impl ViewEntity for Entity {
    fn base(&self) -> &EntityBase {
        self.view().base()
    }

    fn platform(&self) -> Platform {
        self.view().platform()
    }

    fn value(&self) -> EntityValue {
        self.view().value()
    }

    fn icon(&self) -> Option<&'static str> {
        self.view().icon()
    }

    fn category(&self) -> Option<EntityCategory> {
        self.view().category()
    }

    fn available(&self) -> bool {
        self.view().available()
    }

    fn attributes(&self) -> BTreeMap<&'static str, serde_json::Value> {
        self.view().attributes()
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("platform", &self.platform())
            .field("unique_id", &self.base().unique_id())
            .finish()
    }
}
