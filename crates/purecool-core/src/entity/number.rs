use std::sync::Arc;

use super::{EntityBase, EntityCategory, EntityValue, ViewEntity};
use crate::coordinator::UpdateCoordinator;
use crate::device::DeviceClient;
use crate::error::CoreError;
use crate::model::DeviceCommand;
use crate::model::state::{OSCILLATION_MAX, OSCILLATION_MIN};
use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillationBound {
    Lower,
    Upper,
}

/// Editable oscillation boundary. Only meaningful while the fan is on and
/// oscillating, so it is unavailable otherwise.
#[derive(Clone)]
pub struct OscillationBoundary {
    base: EntityBase,
    bound: OscillationBound,
}

impl OscillationBoundary {
    pub const MIN: u16 = OSCILLATION_MIN;
    pub const MAX: u16 = OSCILLATION_MAX;
    pub const STEP: u16 = 1;

    pub fn new(
        device: Arc<dyn DeviceClient>,
        coordinator: UpdateCoordinator,
        bound: OscillationBound,
    ) -> Self {
        let (name, id) = match bound {
            OscillationBound::Lower => ("Oscillation lower boundary", "osal"),
            OscillationBound::Upper => ("Oscillation upper boundary", "osau"),
        };
        Self {
            base: EntityBase::new(device, coordinator, Some(name), Some(id)),
            bound,
        }
    }

    pub fn bound(&self) -> OscillationBound {
        self.bound
    }

    pub fn native_value(&self) -> Option<u16> {
        let state = self.base.state();
        match self.bound {
            OscillationBound::Lower => state.oscillate_lower(),
            OscillationBound::Upper => state.oscillate_upper(),
        }
    }

    /// Move this bound and keep the other one. With the fan off this stops
    /// oscillation instead.
    pub async fn set_value(&self, value: u16) -> Result<(), CoreError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(CoreError::ValidationFailed {
                message: format!("{value} outside {}..={}", Self::MIN, Self::MAX),
            });
        }

        let state = self.base.state();
        let command = if state.is_on() {
            let (lower, upper) = match self.bound {
                OscillationBound::Lower => (Some(value), state.oscillate_upper()),
                OscillationBound::Upper => (state.oscillate_lower(), Some(value)),
            };
            DeviceCommand::oscillate(&state, lower, upper)
        } else {
            DeviceCommand::stop_oscillation(&state)
        };
        self.base.device().send_command(command).await
    }
}

impl ViewEntity for OscillationBoundary {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn platform(&self) -> Platform {
        Platform::Number
    }

    fn value(&self) -> EntityValue {
        EntityValue::Number(self.native_value())
    }

    fn icon(&self) -> Option<&'static str> {
        Some(match self.bound {
            OscillationBound::Lower => "mdi:rotate-left",
            OscillationBound::Upper => "mdi:rotate-right",
        })
    }

    fn category(&self) -> Option<EntityCategory> {
        Some(EntityCategory::Config)
    }

    fn available(&self) -> bool {
        let state = self.base.state();
        self.base.available() && state.is_on() && state.oscillating()
    }
}
