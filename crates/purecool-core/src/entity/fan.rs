use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::{EntityBase, EntityValue, ViewEntity};
use crate::coordinator::UpdateCoordinator;
use crate::device::DeviceClient;
use crate::error::CoreError;
use crate::model::state::{OSCILLATION_MAX, OSCILLATION_MIN, SPEED_MAX};
use crate::model::{DeviceCommand, Direction, PresetMode};
use crate::platform::Platform;

/// Fan state as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanState {
    pub is_on: bool,
    /// 0 when off or in auto speed.
    pub percentage: u8,
    pub speed_count: u8,
    pub direction: Direction,
    pub oscillating: bool,
    /// Only "Auto mode" is offered to the host.
    pub preset_mode: Option<PresetMode>,
}

/// The main fan entity. Carries the bare device identity.
#[derive(Clone)]
pub struct FanEntity {
    base: EntityBase,
}

impl FanEntity {
    pub const PRESET_MODES: [PresetMode; 1] = [PresetMode::Auto];

    pub fn new(device: Arc<dyn DeviceClient>, coordinator: UpdateCoordinator) -> Self {
        Self {
            base: EntityBase::new(device, coordinator, None, None),
        }
    }

    pub fn fan_state(&self) -> FanState {
        let state = self.base.state();
        FanState {
            is_on: state.is_on(),
            percentage: match state.speed() {
                Some(speed) if state.is_on() => speed_to_percentage(speed),
                _ => 0,
            },
            speed_count: SPEED_MAX,
            direction: state.direction(),
            oscillating: state.oscillating(),
            preset_mode: state.preset_mode().filter(|p| *p == PresetMode::Auto),
        }
    }

    // ── Actions ──────────────────────────────────────────────────────

    pub async fn turn_on(
        &self,
        percentage: Option<u8>,
        preset: Option<PresetMode>,
    ) -> Result<(), CoreError> {
        if let Some(preset) = preset {
            self.set_preset_mode(Some(preset)).await?;
        }
        if let Some(percentage) = percentage.filter(|p| *p > 0) {
            self.set_percentage(percentage).await?;
        }
        self.send(DeviceCommand::turn_on(&self.base.state())).await
    }

    pub async fn turn_off(&self) -> Result<(), CoreError> {
        self.send(DeviceCommand::TurnOff).await
    }

    /// `0` turns the fan off; anything else rounds up to the next speed.
    pub async fn set_percentage(&self, percentage: u8) -> Result<(), CoreError> {
        if percentage == 0 {
            return self.turn_off().await;
        }
        let speed = percentage_to_speed(percentage)?;
        self.send(DeviceCommand::set_speed(speed)?).await
    }

    pub async fn set_direction(&self, direction: Direction) -> Result<(), CoreError> {
        self.send(DeviceCommand::set_direction(direction)).await
    }

    pub async fn set_preset_mode(&self, preset: Option<PresetMode>) -> Result<(), CoreError> {
        self.send(DeviceCommand::set_preset_mode(&self.base.state(), preset))
            .await
    }

    /// Toggle oscillation over the full sweep.
    pub async fn oscillate(&self, oscillating: bool) -> Result<(), CoreError> {
        let state = self.base.state();
        let command = if oscillating {
            DeviceCommand::oscillate(&state, Some(OSCILLATION_MIN), Some(OSCILLATION_MAX))
        } else {
            DeviceCommand::stop_oscillation(&state)
        };
        self.send(command).await
    }

    /// Oscillate between custom bounds. A missing bound keeps the current one.
    pub async fn set_oscillation(
        &self,
        lower: Option<u16>,
        upper: Option<u16>,
    ) -> Result<(), CoreError> {
        for bound in [lower, upper].into_iter().flatten() {
            if !(OSCILLATION_MIN..=OSCILLATION_MAX).contains(&bound) {
                return Err(CoreError::ValidationFailed {
                    message: format!(
                        "oscillation bound {bound} outside {OSCILLATION_MIN}..={OSCILLATION_MAX}"
                    ),
                });
            }
        }
        self.send(DeviceCommand::oscillate(&self.base.state(), lower, upper))
            .await
    }

    pub async fn set_sleep_timer(&self, minutes: u16) -> Result<(), CoreError> {
        self.send(DeviceCommand::set_sleep_timer(minutes)?).await
    }

    async fn send(&self, command: DeviceCommand) -> Result<(), CoreError> {
        self.base.device().send_command(command).await
    }
}

impl ViewEntity for FanEntity {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn platform(&self) -> Platform {
        Platform::Fan
    }

    fn value(&self) -> EntityValue {
        EntityValue::Fan(self.fan_state())
    }

    fn icon(&self) -> Option<&'static str> {
        Some("mdi:fan")
    }

    fn attributes(&self) -> BTreeMap<&'static str, serde_json::Value> {
        let state = self.base.state();
        BTreeMap::from([
            ("oscillate_lower", json!(state.oscillate_lower())),
            ("oscillate_upper", json!(state.oscillate_upper())),
            ("sleep_timer", json!(state.sleep_timer())),
        ])
    }
}

fn speed_to_percentage(speed: u8) -> u8 {
    speed.min(SPEED_MAX) * (100 / SPEED_MAX)
}

fn percentage_to_speed(percentage: u8) -> Result<u8, CoreError> {
    if percentage > 100 {
        return Err(CoreError::ValidationFailed {
            message: format!("percentage {percentage} above 100"),
        });
    }
    let speed = (u16::from(percentage) * u16::from(SPEED_MAX)).div_ceil(100);
    u8::try_from(speed).map_err(|_| CoreError::Internal(format!("speed {speed} out of range")))
}
