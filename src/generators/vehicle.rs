use super::{gauss, round_to, GeneratorTable};
use crate::reading::{ObstacleKind, ObstacleReading, ReadingValue, Scenario, SensorType};
use chrono::NaiveDateTime;
use rand::{Rng, RngCore};
use std::collections::BTreeMap;

const LIDAR_STEP_DEG: usize = 45;
pub const LIDAR_RANGE_M: (f64, f64) = (0.5, 50.0);

const SPEED_BASE_KMH: f64 = 60.0;
const SPEED_NOISE_KMH: f64 = 5.0;
pub const SPEED_RANGE_KMH: (f64, f64) = (0.0, 120.0);

const OBSTACLE_PROBABILITY: f64 = 0.2;
pub const OBSTACLE_DISTANCE_M: (f64, f64) = (5.0, 30.0);
const OBSTACLE_KINDS: [ObstacleKind; 3] = [
    ObstacleKind::Vehicle,
    ObstacleKind::Pedestrian,
    ObstacleKind::Static,
];

pub fn register(table: &mut GeneratorTable) {
    table.register(Scenario::AutonomousVehicle, SensorType::Lidar, lidar);
    table.register(Scenario::AutonomousVehicle, SensorType::Speed, speed);
    table.register(Scenario::AutonomousVehicle, SensorType::Obstacle, obstacle);
}

/// One distance sample per 45 degree bearing.
pub fn lidar(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let sweep: BTreeMap<String, f64> = (0..360)
        .step_by(LIDAR_STEP_DEG)
        .map(|angle| {
            let distance = rng.gen_range(LIDAR_RANGE_M.0..=LIDAR_RANGE_M.1);
            (angle.to_string(), round_to(distance, 2))
        })
        .collect();
    ReadingValue::Lidar(sweep)
}

pub fn speed(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    let (low, high) = SPEED_RANGE_KMH;
    ReadingValue::Scalar((SPEED_BASE_KMH + gauss(rng, SPEED_NOISE_KMH)).clamp(low, high))
}

pub fn obstacle(rng: &mut dyn RngCore, _now: NaiveDateTime) -> ReadingValue {
    if !rng.gen_bool(OBSTACLE_PROBABILITY) {
        return ReadingValue::Obstacle(ObstacleReading {
            detected: false,
            distance: None,
            kind: None,
        });
    }
    let distance = rng.gen_range(OBSTACLE_DISTANCE_M.0..=OBSTACLE_DISTANCE_M.1);
    let kind = OBSTACLE_KINDS[rng.gen_range(0..OBSTACLE_KINDS.len())];
    ReadingValue::Obstacle(ObstacleReading {
        detected: true,
        distance: Some(round_to(distance, 1)),
        kind: Some(kind),
    })
}
