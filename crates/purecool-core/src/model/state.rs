// ── Device state snapshot ──
//
// Raw field maps as reported by the device, plus typed accessors. Product
// state values may arrive as `[previous, current]` pairs on state-change
// messages; accessors always see the current value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw key/value payload from the device.
pub type FieldMap = serde_json::Map<String, Value>;

/// Fan speed bounds.
pub const SPEED_MIN: u8 = 1;
pub const SPEED_MAX: u8 = 10;

/// Oscillation angle bounds in degrees.
pub const OSCILLATION_MIN: u16 = 5;
pub const OSCILLATION_MAX: u16 = 355;

/// Sleep timer upper bound in minutes.
pub const SLEEP_TIMER_MAX: u16 = 540;

/// Preset modes reported by the device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter
)]
pub enum PresetMode {
    #[strum(to_string = "Auto mode")]
    #[serde(rename = "Auto mode")]
    Auto,
    #[strum(to_string = "Night mode")]
    #[serde(rename = "Night mode")]
    Night,
    #[strum(to_string = "Auto + Night mode")]
    #[serde(rename = "Auto + Night mode")]
    AutoNight,
}

/// Airflow direction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Forward,
    Reverse,
}

/// Merged view of the device's product state and environmental readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default)]
    pub product: FieldMap,
    #[serde(default)]
    pub environment: FieldMap,
}

impl DeviceState {
    pub fn new(product: FieldMap, environment: FieldMap) -> Self {
        Self {
            product,
            environment,
        }
    }

    /// Current value of a field. Product state shadows environmental data.
    pub fn field(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.product.get(key) {
            return current_value(value);
        }
        self.environment.get(key).and_then(Value::as_str)
    }

    /// Copy of this state with `fields` applied to the product map.
    pub fn with_product_fields<'a>(
        &self,
        fields: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Self {
        let mut next = self.clone();
        for (key, value) in fields {
            next.product.insert(key.to_owned(), Value::String(value));
        }
        next
    }

    fn flag(&self, key: &str) -> bool {
        self.field(key) == Some("ON")
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.field(key).and_then(|v| v.parse().ok())
    }

    // ── Product state ────────────────────────────────────────────────

    pub fn is_on(&self) -> bool {
        self.flag("fpwr")
    }

    /// Manual fan speed. `None` in auto mode or when unreported.
    pub fn speed(&self) -> Option<u8> {
        match self.field("fnsp") {
            Some("AUTO") | None => None,
            Some(v) => v.parse().ok(),
        }
    }

    pub fn direction(&self) -> Direction {
        if self.flag("fdir") {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    pub fn oscillating(&self) -> bool {
        matches!(self.field("oson"), Some("OION" | "ON"))
    }

    /// Whether the device speaks the oscillation-idle (`OION`/`OIOF`) variant.
    pub fn oscillation_idle_family(&self) -> bool {
        matches!(self.field("oson"), Some("OION" | "OIOF"))
    }

    pub fn oscillate_lower(&self) -> Option<u16> {
        self.number("osal")
    }

    pub fn oscillate_upper(&self) -> Option<u16> {
        self.number("osau")
    }

    pub fn preset_mode(&self) -> Option<PresetMode> {
        match (self.flag("auto"), self.flag("nmod")) {
            (true, true) => Some(PresetMode::AutoNight),
            (true, false) => Some(PresetMode::Auto),
            (false, true) => Some(PresetMode::Night),
            (false, false) => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.field("ercd")
    }

    pub fn warning_code(&self) -> Option<&str> {
        self.field("wacd")
    }

    /// Remaining sleep timer minutes; 0 when disabled.
    pub fn sleep_timer(&self) -> u16 {
        match self.field("sltm") {
            Some("OFF") | None => 0,
            Some(v) => v.parse().unwrap_or(0),
        }
    }

    pub fn continuous_monitoring(&self) -> bool {
        self.flag("rhtm")
    }

    // ── Environment ──────────────────────────────────────────────────

    /// Ambient temperature in °C, rounded to 0.1.
    pub fn temperature(&self) -> Option<f64> {
        let deci_kelvin: f64 = self.number("tact")?;
        let celsius = deci_kelvin / 10.0 - 273.15;
        Some((celsius * 10.0).round() / 10.0)
    }

    pub fn humidity(&self) -> Option<u32> {
        self.number("hact")
    }

    pub fn pm25(&self) -> Option<u32> {
        self.number("pm25")
    }

    pub fn pm10(&self) -> Option<u32> {
        self.number("pm10")
    }

    pub fn voc(&self) -> Option<u32> {
        self.number("va10")
    }

    pub fn nox(&self) -> Option<u32> {
        self.number("noxl")
    }

    pub fn hepa_filter_life(&self) -> Option<u32> {
        self.number("hflr")
    }

    pub fn carbon_filter_life(&self) -> Option<u32> {
        self.number("cflr")
    }
}

fn current_value(value: &Value) -> Option<&str> {
    match value {
        Value::Array(pair) => pair.get(1).and_then(Value::as_str),
        other => other.as_str(),
    }
}
