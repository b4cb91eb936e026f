use super::{gauss, GeneratorTable};
use crate::reading::{BloodPressure, ReadingValue, Scenario, SensorType};
use chrono::NaiveDateTime;
use rand::{Rng, RngCore};

const HEART_RATE_BASE_BPM: f64 = 75.0;
const HEART_RATE_NOISE_BPM: f64 = 5.0;
const HEART_RATE_SPIKE_BPM: f64 = 20.0;
const HEART_RATE_SPIKE_PROBABILITY: f64 = 0.05;
pub const HEART_RATE_RANGE: (f64, f64) = (40.0, 120.0);

const SYSTOLIC_BASE: f64 = 120.0;
const DIASTOLIC_BASE: f64 = 80.0;
const BLOOD_PRESSURE_NOISE: f64 = 5.0;
pub const SYSTOLIC_RANGE: (f64, f64) = (90.0, 160.0);
pub const DIASTOLIC_RANGE: (f64, f64) = (60.0, 100.0);

const SPO2_BASE_PERCENT: f64 = 98.0;
const SPO2_NOISE_PERCENT: f64 = 1.0;
const SPO2_DIP_PROBABILITY: f64 = 0.03;
pub const SPO2_RANGE: (f64, f64) = (85.0, 100.0);

pub fn register(table: &mut GeneratorTable) {
    table.register(Scenario::Healthcare, SensorType::HeartRate, heart_rate);
    table.register(Scenario::Healthcare, SensorType::BloodPressure, blood_pressure);
    table.register(Scenario::Healthcare, SensorType::OxygenSaturation, oxygen_saturation);
}

/// Resting heart rate with occasional arrhythmic spikes.
pub fn heart_rate(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let mut variation = gauss(rng, HEART_RATE_NOISE_BPM);
    if rng.gen_bool(HEART_RATE_SPIKE_PROBABILITY) {
        variation += if rng.gen_bool(0.5) {
            HEART_RATE_SPIKE_BPM
        } else {
            -HEART_RATE_SPIKE_BPM
        };
    }
    let (low, high) = HEART_RATE_RANGE;
    ReadingValue::Scalar((HEART_RATE_BASE_BPM + variation).clamp(low, high))
}

/// Systolic and diastolic move together.
pub fn blood_pressure(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let variation = gauss(rng, BLOOD_PRESSURE_NOISE);
    ReadingValue::BloodPressure(BloodPressure {
        systolic: (SYSTOLIC_BASE + variation).clamp(SYSTOLIC_RANGE.0, SYSTOLIC_RANGE.1),
        diastolic: (DIASTOLIC_BASE + variation).clamp(DIASTOLIC_RANGE.0, DIASTOLIC_RANGE.1),
    })
}

pub fn oxygen_saturation(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let mut variation = gauss(rng, SPO2_NOISE_PERCENT);
    if rng.gen_bool(SPO2_DIP_PROBABILITY) {
        variation -= rng.gen_range(5.0..10.0);
    }
    let (low, high) = SPO2_RANGE;
    ReadingValue::Scalar((SPO2_BASE_PERCENT + variation).clamp(low, high))
}
