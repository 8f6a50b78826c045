// ── Device commands ──
//
// Typed state-set requests. Constructors validate their arguments against
// the device's limits and, where the device needs companion fields, read
// them from the current state.

use serde::{Deserialize, Serialize};

use super::state::{
    DeviceState, Direction, OSCILLATION_MAX, OSCILLATION_MIN, PresetMode, SLEEP_TIMER_MAX,
    SPEED_MAX, SPEED_MIN,
};
use crate::error::CoreError;

/// Smallest oscillation sweep the device accepts. Narrower requests collapse
/// to a single angle.
pub const MIN_OSCILLATION_SPAN: u16 = 30;

/// A single state-set request sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "command", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceCommand {
    TurnOn {
        speed: Option<u8>,
    },
    TurnOff,
    SetSpeed {
        speed: u8,
    },
    SetDirection {
        direction: Direction,
    },
    SetPresetMode {
        preset: Option<PresetMode>,
        power_on: bool,
    },
    Oscillate {
        lower: u16,
        upper: u16,
        idle_family: bool,
    },
    StopOscillation {
        idle_family: bool,
    },
    SetSleepTimer {
        minutes: u16,
    },
    SetContinuousMonitoring {
        enabled: bool,
        power_on: bool,
    },
}

impl DeviceCommand {
    /// Power on, keeping the current manual speed.
    pub fn turn_on(state: &DeviceState) -> Self {
        Self::TurnOn {
            speed: state.speed(),
        }
    }

    pub fn set_speed(speed: u8) -> Result<Self, CoreError> {
        if !(SPEED_MIN..=SPEED_MAX).contains(&speed) {
            return Err(CoreError::ValidationFailed {
                message: format!("invalid airflow speed {speed}"),
            });
        }
        Ok(Self::SetSpeed { speed })
    }

    pub fn set_direction(direction: Direction) -> Self {
        Self::SetDirection { direction }
    }

    /// Auto modes force the fan on; the others keep the current power state.
    pub fn set_preset_mode(state: &DeviceState, preset: Option<PresetMode>) -> Self {
        let power_on = match preset {
            Some(PresetMode::Auto | PresetMode::AutoNight) => true,
            Some(PresetMode::Night) | None => state.is_on(),
        };
        Self::SetPresetMode { preset, power_on }
    }

    /// Start oscillating between `lower` and `upper` degrees.
    ///
    /// A missing bound keeps the device's current one. Swapped bounds are
    /// reordered, both are clamped into the supported sweep, and a span
    /// narrower than [`MIN_OSCILLATION_SPAN`] collapses to its midpoint.
    pub fn oscillate(state: &DeviceState, lower: Option<u16>, upper: Option<u16>) -> Self {
        let lower = lower
            .or_else(|| state.oscillate_lower())
            .unwrap_or(OSCILLATION_MIN);
        let upper = upper
            .or_else(|| state.oscillate_upper())
            .unwrap_or(OSCILLATION_MAX);

        let (lower, upper) = if lower > upper {
            (upper, lower)
        } else {
            (lower, upper)
        };
        let mut lower = lower.clamp(OSCILLATION_MIN, OSCILLATION_MAX);
        let mut upper = upper.clamp(OSCILLATION_MIN, OSCILLATION_MAX);

        if upper - lower < MIN_OSCILLATION_SPAN {
            let mid = lower + (upper - lower) / 2;
            lower = mid;
            upper = mid;
        }

        Self::Oscillate {
            lower,
            upper,
            idle_family: state.oscillation_idle_family(),
        }
    }

    pub fn stop_oscillation(state: &DeviceState) -> Self {
        Self::StopOscillation {
            idle_family: state.oscillation_idle_family(),
        }
    }

    /// `0` disables the timer.
    pub fn set_sleep_timer(minutes: u16) -> Result<Self, CoreError> {
        if minutes > SLEEP_TIMER_MAX {
            return Err(CoreError::ValidationFailed {
                message: format!("sleep timer must be 0..={SLEEP_TIMER_MAX} minutes, got {minutes}"),
            });
        }
        Ok(Self::SetSleepTimer { minutes })
    }

    /// The device expects the power flag alongside `rhtm`.
    pub fn set_continuous_monitoring(state: &DeviceState, enabled: bool) -> Self {
        Self::SetContinuousMonitoring {
            enabled,
            power_on: state.is_on(),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Product-state fields this command writes, in wire format.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::TurnOn { speed } => {
                let mut fields = vec![("fpwr", on_off(true))];
                if let Some(speed) = speed {
                    fields.push(("fnsp", padded(*speed)));
                }
                fields
            }
            Self::TurnOff => vec![("fpwr", on_off(false))],
            Self::SetSpeed { speed } => vec![("fpwr", on_off(true)), ("fnsp", padded(*speed))],
            Self::SetDirection { direction } => {
                vec![("fdir", on_off(*direction == Direction::Forward))]
            }
            Self::SetPresetMode { preset, power_on } => {
                let (auto, night) = match preset {
                    Some(PresetMode::AutoNight) => (true, true),
                    Some(PresetMode::Auto) => (true, false),
                    Some(PresetMode::Night) => (false, true),
                    None => (false, false),
                };
                vec![
                    ("fpwr", on_off(*power_on)),
                    ("auto", on_off(auto)),
                    ("nmod", on_off(night)),
                ]
            }
            Self::Oscillate {
                lower,
                upper,
                idle_family,
            } => vec![
                ("oson", if *idle_family { "OION" } else { "ON" }.to_owned()),
                ("fpwr", on_off(true)),
                ("ancp", "CUST".to_owned()),
                ("osal", padded(*lower)),
                ("osau", padded(*upper)),
            ],
            Self::StopOscillation { idle_family } => {
                vec![("oson", if *idle_family { "OIOF" } else { "OFF" }.to_owned())]
            }
            Self::SetSleepTimer { minutes } => vec![("sltm", padded(*minutes))],
            Self::SetContinuousMonitoring { enabled, power_on } => {
                vec![("fpwr", on_off(*power_on)), ("rhtm", on_off(*enabled))]
            }
        }
    }
}

fn on_off(on: bool) -> String {
    let value = if on { "ON" } else { "OFF" };
    value.to_owned()
}

fn padded(value: impl std::fmt::Display) -> String {
    format!("{value:0>4}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn state(fields: &[(&'static str, &str)]) -> DeviceState {
        DeviceState::default().with_product_fields(fields.iter().map(|(k, v)| (*k, (*v).to_owned())))
    }

    fn bounds(cmd: &DeviceCommand) -> (u16, u16) {
        match cmd {
            DeviceCommand::Oscillate { lower, upper, .. } => (*lower, *upper),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn speed_must_be_in_range() {
        assert!(DeviceCommand::set_speed(0).is_err());
        assert!(DeviceCommand::set_speed(11).is_err());
        let cmd = DeviceCommand::set_speed(7).unwrap();
        assert_eq!(
            cmd.fields(),
            vec![("fpwr", "ON".to_owned()), ("fnsp", "0007".to_owned())]
        );
    }

    #[test]
    fn turn_on_keeps_current_speed() {
        let cmd = DeviceCommand::turn_on(&state(&[("fnsp", "0003")]));
        assert_eq!(cmd, DeviceCommand::TurnOn { speed: Some(3) });

        let auto = DeviceCommand::turn_on(&state(&[("fnsp", "AUTO")]));
        assert_eq!(auto.fields(), vec![("fpwr", "ON".to_owned())]);
    }

    #[test]
    fn oscillation_bounds_are_normalized() {
        let current = state(&[("osal", "0090"), ("osau", "0270"), ("oson", "OFF")]);

        assert_eq!(bounds(&DeviceCommand::oscillate(&current, Some(300), Some(100))), (100, 300));
        assert_eq!(bounds(&DeviceCommand::oscillate(&current, Some(0), Some(400))), (5, 355));
        assert_eq!(bounds(&DeviceCommand::oscillate(&current, Some(100), None)), (100, 270));
        assert_eq!(bounds(&DeviceCommand::oscillate(&current, None, None)), (90, 270));
        assert_eq!(bounds(&DeviceCommand::oscillate(&current, Some(100), Some(120))), (110, 110));
    }

    #[test]
    fn oscillation_keeps_idle_family() {
        let idle = state(&[("oson", "OIOF"), ("osal", "0010"), ("osau", "0350")]);
        let cmd = DeviceCommand::oscillate(&idle, None, None);
        assert_eq!(
            cmd.fields(),
            vec![
                ("oson", "OION".to_owned()),
                ("fpwr", "ON".to_owned()),
                ("ancp", "CUST".to_owned()),
                ("osal", "0010".to_owned()),
                ("osau", "0350".to_owned()),
            ]
        );
        assert_eq!(
            DeviceCommand::stop_oscillation(&idle).fields(),
            vec![("oson", "OIOF".to_owned())]
        );
        assert_eq!(
            DeviceCommand::stop_oscillation(&state(&[("oson", "ON")])).fields(),
            vec![("oson", "OFF".to_owned())]
        );
    }

    #[test]
    fn preset_power_rules() {
        let off = state(&[("fpwr", "OFF")]);
        let auto = DeviceCommand::set_preset_mode(&off, Some(PresetMode::Auto));
        assert_eq!(
            auto.fields(),
            vec![
                ("fpwr", "ON".to_owned()),
                ("auto", "ON".to_owned()),
                ("nmod", "OFF".to_owned()),
            ]
        );

        let night = DeviceCommand::set_preset_mode(&off, Some(PresetMode::Night));
        assert_eq!(
            night,
            DeviceCommand::SetPresetMode {
                preset: Some(PresetMode::Night),
                power_on: false
            }
        );
    }

    #[test]
    fn sleep_timer_limits() {
        assert!(DeviceCommand::set_sleep_timer(541).is_err());
        assert_eq!(
            DeviceCommand::set_sleep_timer(90).unwrap().fields(),
            vec![("sltm", "0090".to_owned())]
        );
    }

    #[test]
    fn continuous_monitoring_carries_power() {
        let cmd = DeviceCommand::set_continuous_monitoring(&state(&[("fpwr", "ON")]), false);
        assert_eq!(
            cmd.fields(),
            vec![("fpwr", "ON".to_owned()), ("rhtm", "OFF".to_owned())]
        );
        assert_eq!(cmd.name(), "set_continuous_monitoring");
    }
}
