use crate::broker::DEFAULT_SUBSCRIBER_QUEUE_CAPACITY;
use crate::producer::PublishInterval;
use crate::reading::{Scenario, SensorIdentity, SensorType};
use crate::rules::AlertThresholds;
use crate::store::DEFAULT_SERIES_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MIN_INTERVAL_MS: u64 = 500;
const DEFAULT_MAX_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1884";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sensor type `{sensor_type}` is not declared by scenario `{scenario}`")]
    UnknownSensorType {
        scenario: Scenario,
        sensor_type: SensorType,
    },
    #[error("invalid publish interval: min {min_ms}ms is greater than max {max_ms}ms")]
    InvalidInterval { min_ms: u64, max_ms: u64 },
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("duplicate sensor id `{0}`")]
    DuplicateSensor(String),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Publish interval bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            min_ms: DEFAULT_MIN_INTERVAL_MS,
            max_ms: DEFAULT_MAX_INTERVAL_MS,
        }
    }
}

impl IntervalConfig {
    pub fn to_interval(self) -> Result<PublishInterval, ConfigError> {
        PublishInterval::new(
            Duration::from_millis(self.min_ms),
            Duration::from_millis(self.max_ms),
        )
    }
}

/// Runtime configuration for a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub publish_interval: IntervalConfig,
    /// Per-scenario replacement for `publish_interval`.
    pub interval_overrides: BTreeMap<Scenario, IntervalConfig>,
    pub series_capacity: usize,
    pub subscriber_queue_capacity: usize,
    pub thresholds: AlertThresholds,
    pub sensors: Vec<SensorIdentity>,
    /// Stand-alone sensors of the single-scenario deployment.
    pub generic_sensors: Vec<SensorIdentity>,
    pub enable_generic: bool,
    pub seed: Option<u64>,
    pub listen_addr: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            publish_interval: IntervalConfig::default(),
            interval_overrides: BTreeMap::new(),
            series_capacity: DEFAULT_SERIES_CAPACITY,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
            thresholds: AlertThresholds::default(),
            sensors: default_sensors(),
            generic_sensors: default_generic_sensors(),
            enable_generic: false,
            seed: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl SimulationConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.publish_interval.to_interval()?;
        for interval in self.interval_overrides.values() {
            interval.to_interval()?;
        }
        if self.series_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("series_capacity"));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("subscriber_queue_capacity"));
        }

        let mut seen = HashSet::new();
        for identity in self.active_sensors() {
            if !identity.scenario.declares(identity.sensor_type) {
                return Err(ConfigError::UnknownSensorType {
                    scenario: identity.scenario,
                    sensor_type: identity.sensor_type,
                });
            }
            if !seen.insert(identity.sensor_id.as_str()) {
                return Err(ConfigError::DuplicateSensor(identity.sensor_id.clone()));
            }
        }
        Ok(())
    }

    /// Interval for producers of `scenario`, honouring overrides.
    pub fn interval_for(&self, scenario: Scenario) -> Result<PublishInterval, ConfigError> {
        self.interval_overrides
            .get(&scenario)
            .copied()
            .unwrap_or(self.publish_interval)
            .to_interval()
    }

    /// Sensors that get a producer.
    pub fn active_sensors(&self) -> impl Iterator<Item = &SensorIdentity> {
        let generic: &[SensorIdentity] = if self.enable_generic {
            &self.generic_sensors
        } else {
            &[]
        };
        self.sensors.iter().chain(generic.iter())
    }
}

/// The four-scenario deployment.
pub fn default_sensors() -> Vec<SensorIdentity> {
    [
        ("hr_001", SensorType::HeartRate, Scenario::Healthcare),
        ("bp_001", SensorType::BloodPressure, Scenario::Healthcare),
        ("ox_001", SensorType::OxygenSaturation, Scenario::Healthcare),
        ("lid_001", SensorType::Lidar, Scenario::AutonomousVehicle),
        ("spd_001", SensorType::Speed, Scenario::AutonomousVehicle),
        ("obs_001", SensorType::Obstacle, Scenario::AutonomousVehicle),
        ("rad_001", SensorType::Radar, Scenario::Defense),
        ("ir_001", SensorType::Infrared, Scenario::Defense),
        ("sig_001", SensorType::Signal, Scenario::Defense),
        ("temp_001", SensorType::Temperature, Scenario::HomeIot),
        ("hum_001", SensorType::Humidity, Scenario::HomeIot),
        ("mot_001", SensorType::Motion, Scenario::HomeIot),
        ("pwr_001", SensorType::Power, Scenario::HomeIot),
    ]
    .into_iter()
    .map(|(id, sensor_type, scenario)| SensorIdentity::new(id, sensor_type, scenario))
    .collect()
}

pub fn default_generic_sensors() -> Vec<SensorIdentity> {
    [
        ("temp_002", SensorType::Temperature),
        ("hum_002", SensorType::Humidity),
        ("mot_002", SensorType::Motion),
    ]
    .into_iter()
    .map(|(id, sensor_type)| SensorIdentity::new(id, sensor_type, Scenario::Generic))
    .collect()
}
