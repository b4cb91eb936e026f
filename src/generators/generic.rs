//! Stand-alone temperature/humidity/motion sensors of the single-scenario
//! deployment. Values are wider than the home scenario's so that threshold
//! alerts fire regularly.

use super::{round_to, GeneratorTable};
use crate::reading::{ReadingValue, Scenario, SensorType};
use chrono::NaiveDateTime;
use rand::{Rng, RngCore};

pub const TEMPERATURE_RANGE_C: (f64, f64) = (20.0, 35.0);
pub const HUMIDITY_RANGE_PERCENT: (f64, f64) = (30.0, 90.0);
const MOTION_PROBABILITY: f64 = 0.3;

pub fn register(table: &mut GeneratorTable) {
    table.register(Scenario::Generic, SensorType::Temperature, temperature);
    table.register(Scenario::Generic, SensorType::Humidity, humidity);
    table.register(Scenario::Generic, SensorType::Motion, motion);
}

pub fn temperature(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let (low, high) = TEMPERATURE_RANGE_C;
    ReadingValue::Scalar(round_to(rng.gen_range(low..=high), 1))
}

pub fn humidity(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let (low, high) = HUMIDITY_RANGE_PERCENT;
    ReadingValue::Scalar(round_to(rng.gen_range(low..=high), 1))
}

pub fn motion(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    ReadingValue::Flag(rng.gen_bool(MOTION_PROBABILITY))
}
