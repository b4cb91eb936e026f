use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Deployment scenario a sensor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Healthcare,
    AutonomousVehicle,
    Defense,
    HomeIot,
    /// Single-scenario deployment; its topics omit the scenario segment.
    Generic,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Healthcare,
        Scenario::AutonomousVehicle,
        Scenario::Defense,
        Scenario::HomeIot,
        Scenario::Generic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Healthcare => "healthcare",
            Scenario::AutonomousVehicle => "autonomous_vehicle",
            Scenario::Defense => "defense",
            Scenario::HomeIot => "home_iot",
            Scenario::Generic => "generic",
        }
    }

    /// Sensor types a scenario declares. Producers are only built for these.
    pub fn sensor_types(self) -> &'static [SensorType] {
        match self {
            Scenario::Healthcare => &[
                SensorType::HeartRate,
                SensorType::BloodPressure,
                SensorType::OxygenSaturation,
            ],
            Scenario::AutonomousVehicle => {
                &[SensorType::Lidar, SensorType::Speed, SensorType::Obstacle]
            }
            Scenario::Defense => &[SensorType::Radar, SensorType::Infrared, SensorType::Signal],
            Scenario::HomeIot => &[
                SensorType::Temperature,
                SensorType::Humidity,
                SensorType::Motion,
                SensorType::Power,
            ],
            Scenario::Generic => {
                &[SensorType::Temperature, SensorType::Humidity, SensorType::Motion]
            }
        }
    }

    pub fn declares(self, sensor_type: SensorType) -> bool {
        self.sensor_types().contains(&sensor_type)
    }

    /// Whether topics for this scenario carry a scenario segment.
    pub fn is_single_scenario(self) -> bool {
        matches!(self, Scenario::Generic)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| PayloadError::UnknownScenario(s.to_string()))
    }
}

/// Shape of a reading's `value` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Scalar,
    Flag,
    BloodPressure,
    Lidar,
    Obstacle,
    Signal,
    Radar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    HeartRate,
    BloodPressure,
    OxygenSaturation,
    Lidar,
    Speed,
    Obstacle,
    Radar,
    Infrared,
    Signal,
    Temperature,
    Humidity,
    Motion,
    Power,
}

impl SensorType {
    pub const ALL: [SensorType; 13] = [
        SensorType::HeartRate,
        SensorType::BloodPressure,
        SensorType::OxygenSaturation,
        SensorType::Lidar,
        SensorType::Speed,
        SensorType::Obstacle,
        SensorType::Radar,
        SensorType::Infrared,
        SensorType::Signal,
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Motion,
        SensorType::Power,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::HeartRate => "heart_rate",
            SensorType::BloodPressure => "blood_pressure",
            SensorType::OxygenSaturation => "oxygen_saturation",
            SensorType::Lidar => "lidar",
            SensorType::Speed => "speed",
            SensorType::Obstacle => "obstacle",
            SensorType::Radar => "radar",
            SensorType::Infrared => "infrared",
            SensorType::Signal => "signal",
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Motion => "motion",
            SensorType::Power => "power",
        }
    }

    pub fn shape(self) -> ValueShape {
        match self {
            SensorType::HeartRate
            | SensorType::OxygenSaturation
            | SensorType::Speed
            | SensorType::Infrared
            | SensorType::Temperature
            | SensorType::Humidity
            | SensorType::Power => ValueShape::Scalar,
            SensorType::Motion => ValueShape::Flag,
            SensorType::BloodPressure => ValueShape::BloodPressure,
            SensorType::Lidar => ValueShape::Lidar,
            SensorType::Obstacle => ValueShape::Obstacle,
            SensorType::Signal => ValueShape::Signal,
            SensorType::Radar => ValueShape::Radar,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorType::ALL
            .into_iter()
            .find(|sensor_type| sensor_type.as_str() == s)
            .ok_or_else(|| PayloadError::UnknownSensorType(s.to_string()))
    }
}

/// Identity of a producer. Fixed for the producer's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorIdentity {
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub scenario: Scenario,
}

impl SensorIdentity {
    pub fn new(sensor_id: impl Into<String>, sensor_type: SensorType, scenario: Scenario) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            sensor_type,
            scenario,
        }
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.scenario, self.sensor_type, self.sensor_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: f64,
    pub diastolic: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObstacleKind {
    Vehicle,
    Pedestrian,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleReading {
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ObstacleKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Communication,
    Radar,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SignalKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadarContact {
    pub range: f64,
    pub bearing: f64,
    pub altitude: f64,
    pub speed: f64,
}

/// Value carried by a reading. Which variant is valid is decided by the
/// sensor type, see [`SensorType::shape`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Scalar(f64),
    Flag(bool),
    BloodPressure(BloodPressure),
    /// Distance per bearing, keyed by the angle in degrees as a string.
    Lidar(BTreeMap<String, f64>),
    Obstacle(ObstacleReading),
    Signal(SignalReading),
    Radar(Vec<RadarContact>),
}

impl ReadingValue {
    /// Decode a raw JSON value into the shape `sensor_type` publishes.
    pub fn decode(sensor_type: SensorType, raw: serde_json::Value) -> Result<Self, PayloadError> {
        let decoded = match sensor_type.shape() {
            ValueShape::Scalar => serde_json::from_value(raw).map(ReadingValue::Scalar),
            ValueShape::Flag => serde_json::from_value(raw).map(ReadingValue::Flag),
            ValueShape::BloodPressure => {
                serde_json::from_value(raw).map(ReadingValue::BloodPressure)
            }
            ValueShape::Lidar => serde_json::from_value(raw).map(ReadingValue::Lidar),
            ValueShape::Obstacle => serde_json::from_value(raw).map(ReadingValue::Obstacle),
            ValueShape::Signal => serde_json::from_value(raw).map(ReadingValue::Signal),
            ValueShape::Radar => serde_json::from_value(raw).map(ReadingValue::Radar),
        };
        decoded.map_err(|source| PayloadError::ValueShape {
            sensor_type,
            source,
        })
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            ReadingValue::Scalar(_) => ValueShape::Scalar,
            ReadingValue::Flag(_) => ValueShape::Flag,
            ReadingValue::BloodPressure(_) => ValueShape::BloodPressure,
            ReadingValue::Lidar(_) => ValueShape::Lidar,
            ReadingValue::Obstacle(_) => ValueShape::Obstacle,
            ReadingValue::Signal(_) => ValueShape::Signal,
            ReadingValue::Radar(_) => ValueShape::Radar,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ReadingValue::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ReadingValue::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A single sensor reading as published on `sensor/...` topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireReading")]
pub struct Reading {
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub scenario: Scenario,
    pub value: ReadingValue,
    #[serde(with = "wire_time")]
    pub timestamp: NaiveDateTime,
}

impl Reading {
    pub fn new(identity: &SensorIdentity, value: ReadingValue, timestamp: NaiveDateTime) -> Self {
        Self {
            sensor_id: identity.sensor_id.clone(),
            sensor_type: identity.sensor_type,
            scenario: identity.scenario,
            value,
            timestamp: timestamp.trunc_subsecs(0),
        }
    }
}

/// Loosely typed reading as it arrives off the bus.
///
/// Sensor type and scenario stay strings so that subscribers can tell an
/// unrecognised sensor class apart from a malformed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireReading {
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    /// Absent in payloads from single-scenario publishers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub value: serde_json::Value,
    #[serde(with = "wire_time")]
    pub timestamp: NaiveDateTime,
}

impl TryFrom<WireReading> for Reading {
    type Error = PayloadError;

    fn try_from(wire: WireReading) -> Result<Self, Self::Error> {
        let sensor_type: SensorType = wire.sensor_type.parse()?;
        let scenario = match wire.scenario.as_deref() {
            Some(name) => name.parse()?,
            None => Scenario::Generic,
        };
        let value = ReadingValue::decode(sensor_type, wire.value)?;
        Ok(Self {
            sensor_id: wire.sensor_id,
            sensor_type,
            scenario,
            value,
            timestamp: wire.timestamp,
        })
    }
}

/// Derived alert published on `alerts/...` topics by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub sensor_id: String,
    #[serde(rename = "alert")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(with = "wire_time")]
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("value does not match the {sensor_type} shape: {source}")]
    ValueShape {
        sensor_type: SensorType,
        source: serde_json::Error,
    },
    #[error("unknown sensor type `{0}`")]
    UnknownSensorType(String),
    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),
}

impl PayloadError {
    /// Unknown classes are forward-compatible extensions, not corruption.
    pub fn is_unrecognised(&self) -> bool {
        matches!(
            self,
            PayloadError::UnknownSensorType(_) | PayloadError::UnknownScenario(_)
        )
    }
}

/// `YYYY-MM-DD HH:MM:SS` timestamps used in every payload.
pub mod wire_time {
    use chrono::{Local, NaiveDateTime, SubsecRound};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(timestamp: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&timestamp.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }

    /// Local wall-clock time at wire precision.
    pub fn now() -> NaiveDateTime {
        Local::now().naive_local().trunc_subsecs(0)
    }
}
