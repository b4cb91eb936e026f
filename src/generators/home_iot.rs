use super::{gauss, round_to, GeneratorTable};
use crate::reading::{ReadingValue, Scenario, SensorType};
use chrono::{NaiveDateTime, Timelike};
use rand::{Rng, RngCore};
use std::f64::consts::PI;

const INDOOR_TEMP_BASE_C: f64 = 22.0;
const INDOOR_TEMP_NOISE_C: f64 = 0.5;

const HUMIDITY_BASE_PERCENT: f64 = 45.0;
const HUMIDITY_NOISE_PERCENT: f64 = 3.0;
pub const HUMIDITY_RANGE_PERCENT: (f64, f64) = (30.0, 70.0);

const DAYTIME_HOURS: std::ops::RangeInclusive<u32> = 8..=22;
const DAYTIME_MOTION_PROBABILITY: f64 = 0.3;
const NIGHT_MOTION_PROBABILITY: f64 = 0.05;

const BASE_LOAD_W: f64 = 1000.0;
const PEAK_HOURS: std::ops::RangeInclusive<u32> = 17..=21;
const PEAK_LOAD_FACTOR: f64 = 2.0;
const LOAD_NOISE_W: f64 = 100.0;
pub const MIN_LOAD_W: f64 = 100.0;

pub fn register(table: &mut GeneratorTable) {
    table.register(Scenario::HomeIot, SensorType::Temperature, temperature);
    table.register(Scenario::HomeIot, SensorType::Humidity, humidity);
    table.register(Scenario::HomeIot, SensorType::Motion, motion);
    table.register(Scenario::HomeIot, SensorType::Power, power);
}

/// Indoor temperature following a daily sinusoid.
pub fn temperature(rng: &mut dyn RngCore, now: NaiveDateTime) -> ReadingValue {
    let daily_cycle = (f64::from(now.hour()) * PI / 12.0).sin();
    let value = INDOOR_TEMP_BASE_C + daily_cycle + gauss(rng, INDOOR_TEMP_NOISE_C);
    ReadingValue::Scalar(round_to(value, 1))
}

pub fn humidity(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let (low, high) = HUMIDITY_RANGE_PERCENT;
    ReadingValue::Scalar((HUMIDITY_BASE_PERCENT + gauss(rng, HUMIDITY_NOISE_PERCENT)).clamp(low, high))
}

/// Occupancy is likelier during waking hours.
pub fn motion(rng: &mut dyn RngCore, now: NaiveDateTime) -> ReadingValue {
    let probability = if DAYTIME_HOURS.contains(&now.hour()) {
        DAYTIME_MOTION_PROBABILITY
    } else {
        NIGHT_MOTION_PROBABILITY
    };
    ReadingValue::Flag(rng.gen_bool(probability))
}

/// Household load in watts, doubled over the evening peak.
pub fn power(rng: &mut dyn RngCore, now: NaiveDateTime) -> ReadingValue {
    let base = if PEAK_HOURS.contains(&now.hour()) {
        BASE_LOAD_W * PEAK_LOAD_FACTOR
    } else {
        BASE_LOAD_W
    };
    ReadingValue::Scalar((base + gauss(rng, LOAD_NOISE_W)).max(MIN_LOAD_W))
}
