//! Telemetry payloads handed to the message broker.
//!
//! Three topics are published per device:
//!
//! | Topic | Body |
//! |-------|------|
//! | `{prefix}/{device}/enginedata` | [`EngineData`], absent fields as `null` |
//! | `{prefix}/{device}/engineinfo` | [`EngineInfo`], absent fields as `""` |
//! | `{prefix}/{device}/position` | [`Position`] |

use serde::Serialize;

use crate::value::CycleValues;

/// Topic suffix of a telemetry publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    EngineData,
    EngineInfo,
    Position,
}

impl Topic {
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::EngineData => "enginedata",
            Self::EngineInfo => "engineinfo",
            Self::Position => "position",
        }
    }

    /// Full topic name for `device_id` under `prefix`.
    #[must_use]
    pub fn path(self, prefix: &str, device_id: &str) -> String {
        format!("{prefix}/{device_id}/{}", self.suffix())
    }
}

/// Body of the `enginedata` topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineData {
    pub vin: Option<String>,
    pub rpm: Option<f64>,
    pub throttle: Option<f64>,
    pub spark_adv: Option<f64>,
    pub engine_temp: Option<f64>,
    pub air_temp: Option<f64>,
    pub atm_pressure: Option<f64>,
    pub op_time: Option<f64>,
    pub battery_voltage: Option<f64>,
}

impl EngineData {
    /// Build the body from a completed telemetry cycle and the last known
    /// VIN.
    #[must_use]
    pub fn from_cycle(values: &CycleValues, vin: Option<&str>) -> Self {
        Self {
            vin: vin.map(str::to_owned),
            rpm: values.number("rpm"),
            throttle: values.number("throttle"),
            spark_adv: values.number("sparkAdv"),
            engine_temp: values.number("engineTemp"),
            air_temp: values.number("airTemp"),
            atm_pressure: values.number("atmPressure"),
            op_time: values.number("opTime"),
            battery_voltage: values.number("batteryVoltage"),
        }
    }
}

/// Body of the `engineinfo` topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub vin: String,
    pub ecu_drw: String,
    pub ecu_hw: String,
    pub ecu_sw: String,
    pub calibration: String,
    pub homol_code: String,
}

impl EngineInfo {
    /// Build the body from a completed identification cycle.
    #[must_use]
    pub fn from_cycle(values: &CycleValues) -> Self {
        let text = |field: &str| values.text(field).unwrap_or_default().to_owned();
        Self {
            vin: text("vin"),
            ecu_drw: text("ecuDrw"),
            ecu_hw: text("ecuHw"),
            ecu_sw: text("ecuSw"),
            calibration: text("calibration"),
            homol_code: text("homolCode"),
        }
    }
}

/// A GNSS fix supplied by the host platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in km/h.
    pub speed: Option<f64>,
    /// Altitude in metres.
    pub altitude: Option<f64>,
}

/// Body of the `position` topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    pub rpm: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    /// Combine a fix with the latest decoded engine speed.
    #[must_use]
    pub fn new(fix: GeoFix, rpm: Option<f64>) -> Self {
        Self {
            speed: fix.speed,
            altitude: fix.altitude,
            rpm,
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}
