use std::sync::Arc;

use super::{EntityBase, EntityCategory, EntityValue, ViewEntity};
use crate::coordinator::UpdateCoordinator;
use crate::device::DeviceClient;
use crate::error::CoreError;
use crate::model::{DeviceCommand, PresetMode};
use crate::platform::Platform;

/// Night mode toggle. Leaves the auto flag as it is.
#[derive(Clone)]
pub struct NightModeSwitch {
    base: EntityBase,
}

impl NightModeSwitch {
    pub fn new(device: Arc<dyn DeviceClient>, coordinator: UpdateCoordinator) -> Self {
        Self {
            base: EntityBase::new(device, coordinator, Some("Night mode"), Some("nmod")),
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(
            self.base.state().preset_mode(),
            Some(PresetMode::Night | PresetMode::AutoNight)
        )
    }

    pub async fn turn_on(&self) -> Result<(), CoreError> {
        let preset = match self.base.state().preset_mode() {
            Some(PresetMode::Auto | PresetMode::AutoNight) => PresetMode::AutoNight,
            Some(PresetMode::Night) | None => PresetMode::Night,
        };
        self.set_preset(Some(preset)).await
    }

    pub async fn turn_off(&self) -> Result<(), CoreError> {
        let preset = match self.base.state().preset_mode() {
            Some(PresetMode::AutoNight | PresetMode::Auto) => Some(PresetMode::Auto),
            Some(PresetMode::Night) | None => None,
        };
        self.set_preset(preset).await
    }

    async fn set_preset(&self, preset: Option<PresetMode>) -> Result<(), CoreError> {
        let command = DeviceCommand::set_preset_mode(&self.base.state(), preset);
        self.base.device().send_command(command).await
    }
}

impl ViewEntity for NightModeSwitch {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn platform(&self) -> Platform {
        Platform::Switch
    }

    fn value(&self) -> EntityValue {
        EntityValue::Switch(self.is_on())
    }

    fn icon(&self) -> Option<&'static str> {
        Some(if self.is_on() {
            "mdi:shield-moon"
        } else {
            "mdi:shield-moon-outline"
        })
    }

    fn category(&self) -> Option<EntityCategory> {
        Some(EntityCategory::Config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::device::MemoryDevice;
    use crate::model::DeviceState;

    async fn switch(auto: &str, nmod: &str) -> (Arc<MemoryDevice>, NightModeSwitch) {
        let state = DeviceState::default().with_product_fields([
            ("fpwr", "ON".to_owned()),
            ("auto", auto.to_owned()),
            ("nmod", nmod.to_owned()),
        ]);
        let device = Arc::new(MemoryDevice::new("NK6-EU-MHA0000A", "438").with_state(state));
        device.connect("").await.unwrap();
        let client: Arc<dyn DeviceClient> = device.clone();
        let coordinator = UpdateCoordinator::new(CoordinatorConfig::default(), Arc::clone(&client));
        (device, NightModeSwitch::new(client, coordinator))
    }

    #[tokio::test]
    async fn identity() {
        let (_, sw) = switch("OFF", "OFF").await;
        assert_eq!(sw.base().unique_id(), "NK6-EU-MHA0000A-nmod");
        assert_eq!(sw.base().name(), "Dyson Pure Cool Night mode");
        assert!(!sw.is_on());
        assert_eq!(sw.icon(), Some("mdi:shield-moon-outline"));
    }

    #[tokio::test]
    async fn turning_on_keeps_auto() {
        let (device, sw) = switch("ON", "OFF").await;
        sw.turn_on().await.unwrap();
        assert_eq!(device.state().preset_mode(), Some(PresetMode::AutoNight));
        assert!(sw.is_on());
    }

    #[tokio::test]
    async fn turning_off_keeps_auto() {
        let (device, sw) = switch("ON", "ON").await;
        sw.turn_off().await.unwrap();
        assert_eq!(device.state().preset_mode(), Some(PresetMode::Auto));

        let (device, sw) = switch("OFF", "ON").await;
        sw.turn_off().await.unwrap();
        assert_eq!(device.state().preset_mode(), None);
    }
}
