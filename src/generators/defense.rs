use super::{gauss, round_to, GeneratorTable};
use crate::reading::{RadarContact, ReadingValue, Scenario, SensorType, SignalKind, SignalReading};
use chrono::NaiveDateTime;
use rand::{Rng, RngCore};

const RADAR_CONTACT_PROBABILITY: f64 = 0.3;
pub const MAX_RADAR_CONTACTS: usize = 3;
pub const RADAR_RANGE_M: (f64, f64) = (1000.0, 50000.0);
pub const RADAR_BEARING_DEG: (f64, f64) = (0.0, 359.0);
pub const RADAR_ALTITUDE_M: (f64, f64) = (0.0, 30000.0);
pub const RADAR_SPEED_KMH: (f64, f64) = (100.0, 1000.0);

const INFRARED_BASE_C: f64 = 25.0;
const INFRARED_NOISE_C: f64 = 2.0;
const HOT_SPOT_PROBABILITY: f64 = 0.1;
const HOT_SPOT_BOOST_C: (f64, f64) = (10.0, 30.0);

const SIGNAL_PROBABILITY: f64 = 0.15;
pub const SIGNAL_FREQUENCY_MHZ: (f64, f64) = (30.0, 300.0);
pub const SIGNAL_STRENGTH_DBM: (f64, f64) = (-90.0, -30.0);
const SIGNAL_KINDS: [SignalKind; 3] = [SignalKind::Communication, SignalKind::Radar, SignalKind::Unknown];

pub fn register(table: &mut GeneratorTable) {
    table.register(Scenario::Defense, SensorType::Radar, radar);
    table.register(Scenario::Defense, SensorType::Infrared, infrared);
    table.register(Scenario::Defense, SensorType::Signal, signal);
}

fn uniform(rng: &mut dyn RngCore, (low, high): (f64, f64), places: i32) -> f64 {
    round_to(rng.gen_range(low..=high), places)
}

/// Zero to three tracked contacts per sweep.
pub fn radar(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let mut contacts = Vec::new();
    if rng.gen_bool(RADAR_CONTACT_PROBABILITY) {
        let count = rng.gen_range(1..=MAX_RADAR_CONTACTS);
        for _ in 0..count {
            contacts.push(RadarContact {
                range: uniform(rng, RADAR_RANGE_M, 0),
                bearing: uniform(rng, RADAR_BEARING_DEG, 1),
                altitude: uniform(rng, RADAR_ALTITUDE_M, 0),
                speed: uniform(rng, RADAR_SPEED_KMH, 0),
            });
        }
    }
    ReadingValue::Radar(contacts)
}

/// Thermal signature in degrees Celsius.
pub fn infrared(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let mut variation = gauss(rng, INFRARED_NOISE_C);
    if rng.gen_bool(HOT_SPOT_PROBABILITY) {
        variation += rng.gen_range(HOT_SPOT_BOOST_C.0..HOT_SPOT_BOOST_C.1);
    }
    ReadingValue::Scalar(round_to(INFRARED_BASE_C + variation, 1))
}

/// RF emission detection.
pub fn signal(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    if !rng.gen_bool(SIGNAL_PROBABILITY) {
        return ReadingValue::Signal(SignalReading {
            detected: false,
            frequency: None,
            strength: None,
            kind: None,
        });
    }
    ReadingValue::Signal(SignalReading {
        detected: true,
        frequency: Some(uniform(rng, SIGNAL_FREQUENCY_MHZ, 1)),
        strength: Some(uniform(rng, SIGNAL_STRENGTH_DBM, 1)),
        kind: Some(SIGNAL_KINDS[rng.gen_range(0..SIGNAL_KINDS.len())]),
    })
}
