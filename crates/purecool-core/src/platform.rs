// ── Platform forwarding ──
//
// An entry's entities are grouped by platform and handed to a host, which
// owns their attachments from then on. `EntityRegistry` is the in-process
// host: it attaches every entity to a render scheduler and detaches them
// when their platform unloads.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::coordinator::UpdateCoordinator;
use crate::device::DeviceClient;
use crate::entity::{
    Entity, EntityAttachment, FanEntity, NightModeSwitch, OscillationBound, OscillationBoundary,
    RenderRequest, RenderScheduler, RenderTrigger, RenderedState, SensorEntity, ViewEntity,
};
use crate::entry::EntryId;
use crate::error::CoreError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    strum::Display,
    strum::EnumIter
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Fan,
    Sensor,
    Switch,
    Number,
}

/// Every platform an entry forwards to.
pub const PLATFORMS: [Platform; 4] = [
    Platform::Fan,
    Platform::Sensor,
    Platform::Switch,
    Platform::Number,
];

/// Entities of one platform for one device.
pub fn build_entities(
    platform: Platform,
    device: &Arc<dyn DeviceClient>,
    coordinator: &UpdateCoordinator,
) -> Vec<Entity> {
    match platform {
        Platform::Fan => vec![Entity::Fan(FanEntity::new(
            Arc::clone(device),
            coordinator.clone(),
        ))],
        Platform::Sensor => SensorEntity::all(device, coordinator)
            .into_iter()
            .map(Entity::Sensor)
            .collect(),
        Platform::Switch => vec![Entity::Switch(NightModeSwitch::new(
            Arc::clone(device),
            coordinator.clone(),
        ))],
        Platform::Number => [OscillationBound::Lower, OscillationBound::Upper]
            .into_iter()
            .map(|bound| {
                Entity::Number(OscillationBoundary::new(
                    Arc::clone(device),
                    coordinator.clone(),
                    bound,
                ))
            })
            .collect(),
    }
}

/// Receiver of platform setup and unload requests.
#[async_trait]
pub trait PlatformHost: Send + Sync {
    /// Take ownership of `entities` and make them visible.
    async fn forward_setup(
        &self,
        entry_id: EntryId,
        platform: Platform,
        entities: Vec<Entity>,
    ) -> Result<(), CoreError>;

    /// Detach and drop the platform's entities. `true` once the platform
    /// holds nothing for the entry, including when it was already empty;
    /// `false` means entities may still be attached.
    async fn unload(&self, entry_id: EntryId, platform: Platform) -> bool;
}

// ── EntityRegistry ───────────────────────────────────────────────────

struct Registered {
    entity: Entity,
    _attachment: EntityAttachment,
}

/// In-process [`PlatformHost`] that routes every render signal to a
/// [`RenderScheduler`].
pub struct EntityRegistry {
    scheduler: Arc<dyn RenderScheduler>,
    platforms: DashMap<(EntryId, Platform), Vec<Registered>>,
}

impl EntityRegistry {
    pub fn new(scheduler: Arc<dyn RenderScheduler>) -> Self {
        Self {
            scheduler,
            platforms: DashMap::new(),
        }
    }

    /// Look up a registered entity by unique id.
    pub fn get(&self, unique_id: &str) -> Option<Entity> {
        self.platforms.iter().find_map(|slot| {
            slot.value()
                .iter()
                .find(|r| r.entity.base().unique_id() == unique_id)
                .map(|r| r.entity.clone())
        })
    }

    pub fn render(&self, unique_id: &str) -> Option<RenderedState> {
        self.get(unique_id).map(|entity| entity.render())
    }

    /// Entities of one entry, ordered by platform.
    pub fn entities(&self, entry_id: EntryId) -> Vec<Entity> {
        let mut slots: Vec<_> = self
            .platforms
            .iter()
            .filter(|slot| slot.key().0 == entry_id)
            .map(|slot| {
                let entities: Vec<Entity> = slot.value().iter().map(|r| r.entity.clone()).collect();
                (slot.key().1, entities)
            })
            .collect();
        slots.sort_by_key(|(platform, _)| *platform);
        slots.into_iter().flat_map(|(_, entities)| entities).collect()
    }

    /// Platforms currently loaded for `entry_id`.
    pub fn loaded_platforms(&self, entry_id: EntryId) -> Vec<Platform> {
        let mut loaded: Vec<Platform> = self
            .platforms
            .iter()
            .filter(|slot| slot.key().0 == entry_id)
            .map(|slot| slot.key().1)
            .collect();
        loaded.sort();
        loaded
    }

    pub fn len(&self) -> usize {
        self.platforms.iter().map(|slot| slot.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PlatformHost for EntityRegistry {
    async fn forward_setup(
        &self,
        entry_id: EntryId,
        platform: Platform,
        entities: Vec<Entity>,
    ) -> Result<(), CoreError> {
        let key = (entry_id, platform);
        if self.platforms.contains_key(&key) {
            return Err(CoreError::Platform {
                platform: platform.to_string(),
                message: format!("already set up for entry {entry_id}"),
            });
        }

        let registered: Vec<Registered> = entities
            .into_iter()
            .map(|entity| {
                let attachment = entity.base().attach(Arc::clone(&self.scheduler));
                Registered {
                    entity,
                    _attachment: attachment,
                }
            })
            .collect();

        for r in &registered {
            self.scheduler.schedule_render(RenderRequest {
                unique_id: r.entity.base().unique_id(),
                trigger: RenderTrigger::Added,
            });
        }

        debug!(entry_id = %entry_id, %platform, entities = registered.len(), "platform set up");
        self.platforms.insert(key, registered);
        Ok(())
    }

    async fn unload(&self, entry_id: EntryId, platform: Platform) -> bool {
        let removed = self.platforms.remove(&(entry_id, platform));
        let entities = removed.map_or(0, |(_, registered)| registered.len());
        debug!(entry_id = %entry_id, %platform, entities, "platform unloaded");
        true
    }
}
