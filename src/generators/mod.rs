pub mod defense;
pub mod generic;
pub mod healthcare;
pub mod home_iot;
pub mod vehicle;

use crate::config::ConfigError;
use crate::reading::{ReadingValue, Scenario, SensorIdentity, SensorType};
use chrono::NaiveDateTime;
use rand::RngCore;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::fmt;

/// Produces one synthetic value. Pure apart from the random source; `now`
/// is passed in so time-of-day patterns are testable.
pub type GeneratorFn = fn(&mut dyn RngCore, NaiveDateTime) -> ReadingValue;

/// Generator dispatch keyed by (scenario, sensor type).
#[derive(Clone)]
pub struct GeneratorTable {
    entries: HashMap<(Scenario, SensorType), GeneratorFn>,
}

impl GeneratorTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, scenario: Scenario, sensor_type: SensorType, generator: GeneratorFn) {
        self.entries.insert((scenario, sensor_type), generator);
    }

    pub fn lookup(&self, scenario: Scenario, sensor_type: SensorType) -> Option<GeneratorFn> {
        self.entries.get(&(scenario, sensor_type)).copied()
    }

    /// Resolve the generator for a producer. Unknown or undeclared sensor
    /// types are configuration errors.
    pub fn resolve(&self, identity: &SensorIdentity) -> Result<GeneratorFn, ConfigError> {
        let unknown = || ConfigError::UnknownSensorType {
            scenario: identity.scenario,
            sensor_type: identity.sensor_type,
        };
        if !identity.scenario.declares(identity.sensor_type) {
            return Err(unknown());
        }
        self.lookup(identity.scenario, identity.sensor_type)
            .ok_or_else(unknown)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for GeneratorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("GeneratorTable").field("entries", &keys).finish()
    }
}

impl Default for GeneratorTable {
    fn default() -> Self {
        let mut table = Self::empty();
        healthcare::register(&mut table);
        vehicle::register(&mut table);
        defense::register(&mut table);
        home_iot::register(&mut table);
        generic::register(&mut table);
        table
    }
}

/// Zero-mean gaussian noise.
pub(crate) fn gauss(rng: &mut dyn RngCore, std_dev: f64) -> f64 {
    Normal::new(0.0, std_dev).map_or(0.0, |normal| normal.sample(rng))
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
