use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use strum::IntoEnumIterator;

use super::{EntityBase, EntityCategory, EntityValue, ViewEntity};
use crate::coordinator::UpdateCoordinator;
use crate::device::DeviceClient;
use crate::model::DeviceState;
use crate::platform::Platform;

const CELSIUS: &str = "°C";
const PERCENTAGE: &str = "%";
const MICROGRAMS_PER_CUBIC_METER: &str = "µg/m³";

/// What a sensor measures, as the host classifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorDeviceClass {
    Temperature,
    Humidity,
    Pm25,
    Pm10,
    VolatileOrganicCompounds,
    NitrogenDioxide,
}

/// How readings relate over time. Every reading here is a point measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateClass {
    Measurement,
}

/// The environmental readings exposed as sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::IntoStaticStr)]
pub enum SensorKind {
    #[strum(serialize = "temperature")]
    Temperature,
    #[strum(serialize = "humidity")]
    Humidity,
    #[strum(serialize = "pm25")]
    Pm25,
    #[strum(serialize = "pm10")]
    Pm10,
    #[strum(serialize = "va10")]
    Voc,
    #[strum(serialize = "noxl")]
    Nox,
    #[strum(serialize = "hflr")]
    HepaFilterLife,
    #[strum(serialize = "cflr")]
    CarbonFilterLife,
}

impl SensorKind {
    /// Entity-local id, also the device field the reading comes from.
    pub fn id(self) -> &'static str {
        self.into()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
            Self::Pm25 => "Particulate matter (PM2.5)",
            Self::Pm10 => "Particulate matter (PM10)",
            Self::Voc => "Volatile organic compounds",
            Self::Nox => "Nitrogen dioxide and other oxidising gases",
            Self::HepaFilterLife => "HEPA filter life",
            Self::CarbonFilterLife => "Carbon filter life",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => CELSIUS,
            Self::Humidity | Self::HepaFilterLife | Self::CarbonFilterLife => PERCENTAGE,
            Self::Pm25 | Self::Pm10 | Self::Voc | Self::Nox => MICROGRAMS_PER_CUBIC_METER,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Temperature => "mdi:thermometer",
            Self::Humidity => "mdi:water-percent",
            Self::Pm25 | Self::Pm10 => "mdi:blur-radial",
            Self::Voc | Self::Nox => "mdi:molecule",
            Self::HepaFilterLife => "mdi:alpha-h-box-outline",
            Self::CarbonFilterLife => "mdi:alpha-c-box-outline",
        }
    }

    /// Filter life has no device class.
    pub fn device_class(self) -> Option<SensorDeviceClass> {
        match self {
            Self::Temperature => Some(SensorDeviceClass::Temperature),
            Self::Humidity => Some(SensorDeviceClass::Humidity),
            Self::Pm25 => Some(SensorDeviceClass::Pm25),
            Self::Pm10 => Some(SensorDeviceClass::Pm10),
            Self::Voc => Some(SensorDeviceClass::VolatileOrganicCompounds),
            Self::Nox => Some(SensorDeviceClass::NitrogenDioxide),
            Self::HepaFilterLife | Self::CarbonFilterLife => None,
        }
    }

    #[allow(clippy::unused_self)]
    pub fn state_class(self) -> StateClass {
        StateClass::Measurement
    }

    /// Decimal places the host should show. Only temperature has a fraction.
    pub fn suggested_display_precision(self) -> Option<u8> {
        match self {
            Self::Temperature => Some(1),
            _ => None,
        }
    }

    /// Filter life readings are diagnostics, not measurements.
    pub fn category(self) -> Option<EntityCategory> {
        match self {
            Self::HepaFilterLife | Self::CarbonFilterLife => Some(EntityCategory::Diagnostic),
            _ => None,
        }
    }

    pub fn read(self, state: &DeviceState) -> Option<f64> {
        let integer = match self {
            Self::Temperature => return state.temperature(),
            Self::Humidity => state.humidity(),
            Self::Pm25 => state.pm25(),
            Self::Pm10 => state.pm10(),
            Self::Voc => state.voc(),
            Self::Nox => state.nox(),
            Self::HepaFilterLife => state.hepa_filter_life(),
            Self::CarbonFilterLife => state.carbon_filter_life(),
        };
        integer.map(f64::from)
    }
}

#[derive(Clone)]
pub struct SensorEntity {
    base: EntityBase,
    kind: SensorKind,
}

impl SensorEntity {
    pub fn new(
        device: Arc<dyn DeviceClient>,
        coordinator: UpdateCoordinator,
        kind: SensorKind,
    ) -> Self {
        Self {
            base: EntityBase::new(device, coordinator, Some(kind.label()), Some(kind.id())),
            kind,
        }
    }

    /// One sensor per reading.
    pub fn all(device: &Arc<dyn DeviceClient>, coordinator: &UpdateCoordinator) -> Vec<Self> {
        SensorKind::iter()
            .map(|kind| Self::new(Arc::clone(device), coordinator.clone(), kind))
            .collect()
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn native_value(&self) -> Option<f64> {
        self.kind.read(&self.base.state())
    }
}

impl ViewEntity for SensorEntity {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn value(&self) -> EntityValue {
        EntityValue::Sensor(self.native_value())
    }

    fn icon(&self) -> Option<&'static str> {
        Some(self.kind.icon())
    }

    fn category(&self) -> Option<EntityCategory> {
        self.kind.category()
    }

    fn attributes(&self) -> BTreeMap<&'static str, Value> {
        let mut attributes = BTreeMap::from([
            ("unit_of_measurement", Value::from(self.kind.unit())),
            ("state_class", Value::from(self.kind.state_class().to_string())),
        ]);
        if let Some(class) = self.kind.device_class() {
            attributes.insert("device_class", Value::from(class.to_string()));
        }
        if let Some(precision) = self.kind.suggested_display_precision() {
            attributes.insert("suggested_display_precision", Value::from(precision));
        }
        attributes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::device::MemoryDevice;

    fn sensors(environment: serde_json::Value) -> Vec<SensorEntity> {
        let device = MemoryDevice::new("NK6-EU-MHA0000A", "438");
        if let serde_json::Value::Object(map) = environment {
            device.set_environment(map);
        }
        let client: Arc<dyn DeviceClient> = Arc::new(device);
        let coordinator = UpdateCoordinator::new(CoordinatorConfig::default(), Arc::clone(&client));
        SensorEntity::all(&client, &coordinator)
    }

    #[test]
    fn one_sensor_per_reading() {
        let ids: Vec<_> = sensors(json!({}))
            .iter()
            .map(|s| s.base().unique_id())
            .collect();
        assert_eq!(
            ids,
            [
                "temperature", "humidity", "pm25", "pm10", "va10", "noxl", "hflr", "cflr"
            ]
            .map(|id| format!("NK6-EU-MHA0000A-{id}"))
        );
    }

    #[test]
    fn humidity_sensor_name() {
        let all = sensors(json!({}));
        let humidity = all
            .iter()
            .find(|s| s.kind() == SensorKind::Humidity)
            .unwrap();
        assert_eq!(humidity.base().name(), "Dyson Pure Cool Humidity");
        assert_eq!(humidity.render().attributes["unit_of_measurement"], json!("%"));
    }

    #[test]
    fn values_and_categories() {
        let all = sensors(json!({ "hact": "0040", "pm25": "INIT", "cflr": "0075" }));
        let by_kind = |kind| all.iter().find(|s| s.kind() == kind).unwrap();

        assert_eq!(by_kind(SensorKind::Humidity).native_value(), Some(40.0));
        assert_eq!(by_kind(SensorKind::Pm25).native_value(), None);
        assert_eq!(by_kind(SensorKind::Temperature).native_value(), None);

        let carbon = by_kind(SensorKind::CarbonFilterLife);
        assert_eq!(carbon.native_value(), Some(75.0));
        assert_eq!(carbon.category(), Some(EntityCategory::Diagnostic));
        assert_eq!(by_kind(SensorKind::Humidity).category(), None);
    }

    #[test]
    fn host_classification_attributes() {
        let all = sensors(json!({ "tact": "2955" }));
        let attributes = |kind| {
            all.iter()
                .find(|s| s.kind() == kind)
                .unwrap()
                .render()
                .attributes
        };

        let temperature = attributes(SensorKind::Temperature);
        assert_eq!(temperature["device_class"], json!("temperature"));
        assert_eq!(temperature["state_class"], json!("measurement"));
        assert_eq!(temperature["suggested_display_precision"], json!(1));

        let voc = attributes(SensorKind::Voc);
        assert_eq!(voc["device_class"], json!("volatile_organic_compounds"));
        assert!(!voc.contains_key("suggested_display_precision"));
        assert_eq!(
            attributes(SensorKind::Nox)["device_class"],
            json!("nitrogen_dioxide")
        );

        let hepa = attributes(SensorKind::HepaFilterLife);
        assert!(!hepa.contains_key("device_class"));
        assert_eq!(hepa["state_class"], json!("measurement"));
    }
}
