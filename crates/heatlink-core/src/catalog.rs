// ── Register catalog ──
//
// Static id → metadata table describing the registers a device exposes.
// Loaded once (built-in or from a catalog file) and shared read-only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use heatlink_api::Access;

use crate::error::CoreError;

/// Physical quantity a register measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceClass {
    Temperature,
    Power,
    Energy,
    Pressure,
    Frequency,
    Duration,
    Enum,
}

/// How a register's value evolves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

/// Static description of one register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: u32,
    /// Stable snake_case key, e.g. `heating_supply_temp`.
    pub key: String,
    /// Name the firmware reports, e.g. `Input.THeatSupply`.
    pub vendor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<DeviceClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<StateClass>,
    #[serde(default)]
    pub access: Access,
    /// Decimal places kept after transformation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    /// Raw value → label, e.g. `"3" → "heating"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value_map: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl EntityDescriptor {
    pub fn new(id: u32, key: impl Into<String>, vendor_name: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            vendor_name: vendor_name.into(),
            unit: None,
            device_class: None,
            state_class: None,
            access: Access::Read,
            precision: None,
            value_map: BTreeMap::new(),
            min: None,
            max: None,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    pub fn is_temperature(&self) -> bool {
        self.device_class == Some(DeviceClass::Temperature) || self.unit.as_deref() == Some("°C")
    }

    pub fn is_percentage(&self) -> bool {
        self.unit.as_deref() == Some("%")
    }

    // ── Builder helpers for the built-in table ──

    fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_owned());
        self
    }

    fn temperature(self) -> Self {
        let mut d = self.unit("°C");
        d.device_class = Some(DeviceClass::Temperature);
        d.state_class = Some(StateClass::Measurement);
        d.precision = Some(1);
        d
    }

    fn percentage(self) -> Self {
        let mut d = self.unit("%");
        d.state_class = Some(StateClass::Measurement);
        d.precision = Some(0);
        d
    }

    fn states(mut self, labels: &[&str]) -> Self {
        self.device_class = Some(DeviceClass::Enum);
        self.value_map = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (i.to_string(), (*label).to_owned()))
            .collect();
        self
    }

    fn writable(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.access = Access::ReadWrite;
        self.min = min;
        self.max = max;
        self
    }
}

/// Immutable id → descriptor table.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<u32, EntityDescriptor>,
}

impl Catalog {
    /// Build a catalog. Duplicate ids are rejected.
    pub fn new(descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Result<Self, CoreError> {
        let mut entries = BTreeMap::new();
        for descriptor in descriptors {
            let id = descriptor.id;
            if entries.insert(id, descriptor).is_some() {
                return Err(CoreError::Config {
                    message: format!("duplicate catalog entry for id {id}"),
                });
            }
        }
        Ok(Self { entries })
    }

    /// The essential LOM320 registers.
    pub fn builtin() -> Self {
        let entries = builtin_entries()
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: u32) -> Option<&EntityDescriptor> {
        self.entries.get(&id)
    }

    /// Every catalogued id, ascending. All registers are readable.
    pub fn readable_ids(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entries.values()
    }

    /// Find a descriptor by key or vendor name (case-insensitive).
    pub fn find(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entries.values().find(|d| {
            d.key.eq_ignore_ascii_case(name) || d.vendor_name.eq_ignore_ascii_case(name)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const HEATPUMP_STATES: [&str; 12] = [
    "off",
    "ready",
    "start_up",
    "heating",
    "hot_water",
    "el_heating",
    "defrost",
    "drip_delay",
    "total_stop",
    "pump_exercise",
    "forced_running",
    "manual",
];

const SEASONS: [&str; 3] = ["winter", "summer", "auto"];

fn builtin_entries() -> Vec<EntityDescriptor> {
    use EntityDescriptor as E;
    vec![
        E::new(193, "room_setpoint", "HeatSPCtrl.TroomSet")
            .temperature()
            .writable(Some(10.0), Some(30.0)),
        E::new(220, "hot_tap_water_output", "Output.HotTapWater"),
        E::new(228, "alarm_output", "Output.Alarm"),
        E::new(253, "heating_supply_temp", "Input.THeatSupply").temperature(),
        E::new(254, "heating_return_temp", "Input.THeatReturn").temperature(),
        E::new(255, "water_tank_temp", "Input.TWaterTank").temperature(),
        E::new(256, "ambient_temp", "Input.Tamb").temperature(),
        E::new(257, "room_temp", "Input.Troom").temperature(),
        E::new(278, "season_mode", "Parameters.SeasonMode")
            .states(&SEASONS)
            .writable(Some(0.0), Some(2.0)),
        E::new(296, "heatpump_season_state", "HeatPump.SeasonState").states(&SEASONS),
        E::new(297, "heatpump_state", "HeatPump.State").states(&HEATPUMP_STATES),
        E::new(299, "capacity_actual", "HeatPump.CapacityAct").percentage(),
        E::new(300, "capacity_requested", "HeatPump.CapacityReq").percentage(),
        E::new(364, "solar_panel_state", "SolarPanel.State"),
        E::new(380, "hot_water_source", "HotWater.Source").writable(None, None),
        E::new(383, "hot_water_setpoint", "HotWater.SetPoint")
            .temperature()
            .writable(Some(40.0), Some(65.0)),
        E::new(386, "hot_water_setpoint_actual", "HotWater.SetPointAct").temperature(),
        E::new(420, "heating_setpoint_actual", "Heating.SetPointAct").temperature(),
    ]
}
