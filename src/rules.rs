//! Stateless alert rules.
//!
//! Each reading is checked against the predicate registered for its
//! (scenario, sensor type). A hit becomes an [`AlertEvent`] published on
//! the matching `alerts/...` topic. Sensor classes without a rule are
//! ignored.

use crate::broker::{publish_json, BusError, HandlerError, Message, MessageBus, MessageHandler};
use crate::reading::{wire_time, AlertEvent, Reading, ReadingValue, Scenario, SensorType, WireReading};
use crate::topic::{self, MULTI_LEVEL_WILDCARD, SENSOR_ROOT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Rule thresholds. The defaults are demo values; deployments tune them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub temperature_high_c: f64,
    pub humidity_high_percent: f64,
    pub heart_rate_high_bpm: f64,
    pub heart_rate_low_bpm: f64,
    pub oxygen_saturation_low_percent: f64,
    pub systolic_high: f64,
    pub diastolic_high: f64,
    pub obstacle_safety_margin_m: f64,
    pub infrared_hot_c: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temperature_high_c: 30.0,
            humidity_high_percent: 80.0,
            heart_rate_high_bpm: 100.0,
            heart_rate_low_bpm: 50.0,
            oxygen_saturation_low_percent: 92.0,
            systolic_high: 140.0,
            diastolic_high: 90.0,
            obstacle_safety_margin_m: 10.0,
            infrared_hot_c: 40.0,
        }
    }
}

/// A triggered rule, before it is stamped with sensor id and time.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub message: String,
    pub value: Option<Value>,
}

impl RuleHit {
    fn new(message: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            message: message.into(),
            value,
        }
    }
}

pub type RulePredicate = fn(&Reading, &AlertThresholds) -> Option<RuleHit>;

/// Alert predicates keyed by (scenario, sensor type).
#[derive(Clone)]
pub struct RuleTable {
    entries: HashMap<(Scenario, SensorType), RulePredicate>,
}

impl RuleTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, scenario: Scenario, sensor_type: SensorType, predicate: RulePredicate) {
        self.entries.insert((scenario, sensor_type), predicate);
    }

    pub fn lookup(&self, scenario: Scenario, sensor_type: SensorType) -> Option<RulePredicate> {
        self.entries.get(&(scenario, sensor_type)).copied()
    }
}

impl fmt::Debug for RuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("RuleTable").field("entries", &keys).finish()
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for scenario in [Scenario::HomeIot, Scenario::Generic] {
            table.register(scenario, SensorType::Temperature, high_temperature);
            table.register(scenario, SensorType::Humidity, high_humidity);
            table.register(scenario, SensorType::Motion, motion_detected);
        }
        table.register(Scenario::Healthcare, SensorType::HeartRate, abnormal_heart_rate);
        table.register(Scenario::Healthcare, SensorType::OxygenSaturation, low_oxygen);
        table.register(Scenario::Healthcare, SensorType::BloodPressure, high_blood_pressure);
        table.register(Scenario::AutonomousVehicle, SensorType::Obstacle, close_obstacle);
        table.register(Scenario::Defense, SensorType::Radar, radar_contact);
        table.register(Scenario::Defense, SensorType::Signal, rf_signal);
        table.register(Scenario::Defense, SensorType::Infrared, thermal_signature);
        table
    }
}

fn scalar_above(reading: &Reading, threshold: f64, message: &str) -> Option<RuleHit> {
    let value = reading.value.as_scalar()?;
    (value > threshold).then(|| RuleHit::new(message, Some(Value::from(value))))
}

fn high_temperature(reading: &Reading, thresholds: &AlertThresholds) -> Option<RuleHit> {
    scalar_above(reading, thresholds.temperature_high_c, "High temperature detected")
}

fn high_humidity(reading: &Reading, thresholds: &AlertThresholds) -> Option<RuleHit> {
    scalar_above(reading, thresholds.humidity_high_percent, "High humidity detected")
}

fn motion_detected(reading: &Reading, _thresholds: &AlertThresholds) -> Option<RuleHit> {
    reading
        .value
        .as_flag()
        .filter(|detected| *detected)
        .map(|_| RuleHit::new("Motion detected", None))
}

fn abnormal_heart_rate(reading: &Reading, thresholds: &AlertThresholds) -> Option<RuleHit> {
    let bpm = reading.value.as_scalar()?;
    if bpm > thresholds.heart_rate_high_bpm {
        Some(RuleHit::new("High heart rate detected", Some(Value::from(bpm))))
    } else if bpm < thresholds.heart_rate_low_bpm {
        Some(RuleHit::new("Low heart rate detected", Some(Value::from(bpm))))
    } else {
        None
    }
}

fn low_oxygen(reading: &Reading, thresholds: &AlertThresholds) -> Option<RuleHit> {
    let spo2 = reading.value.as_scalar()?;
    (spo2 < thresholds.oxygen_saturation_low_percent)
        .then(|| RuleHit::new("Low oxygen saturation detected", Some(Value::from(spo2))))
}

fn high_blood_pressure(reading: &Reading, thresholds: &AlertThresholds) -> Option<RuleHit> {
    let ReadingValue::BloodPressure(pressure) = &reading.value else {
        return None;
    };
    (pressure.systolic > thresholds.systolic_high || pressure.diastolic > thresholds.diastolic_high)
        .then(|| RuleHit::new("High blood pressure detected", Some(reading.value.to_json())))
}

fn close_obstacle(reading: &Reading, thresholds: &AlertThresholds) -> Option<RuleHit> {
    let ReadingValue::Obstacle(obstacle) = &reading.value else {
        return None;
    };
    let distance = obstacle.distance.filter(|_| obstacle.detected)?;
    (distance < thresholds.obstacle_safety_margin_m).then(|| {
        RuleHit::new("Obstacle detected within safety margin", Some(reading.value.to_json()))
    })
}

fn radar_contact(reading: &Reading, _thresholds: &AlertThresholds) -> Option<RuleHit> {
    let ReadingValue::Radar(contacts) = &reading.value else {
        return None;
    };
    (!contacts.is_empty()).then(|| RuleHit::new("Radar contact detected", Some(reading.value.to_json())))
}

fn rf_signal(reading: &Reading, _thresholds: &AlertThresholds) -> Option<RuleHit> {
    let ReadingValue::Signal(signal) = &reading.value else {
        return None;
    };
    signal
        .detected
        .then(|| RuleHit::new("RF signal detected", Some(reading.value.to_json())))
}

fn thermal_signature(reading: &Reading, thresholds: &AlertThresholds) -> Option<RuleHit> {
    scalar_above(reading, thresholds.infrared_hot_c, "Thermal signature detected")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEngineStats {
    pub evaluated: u64,
    pub alerts_raised: u64,
    pub ignored: u64,
}

/// Subscribes to every reading and republishes rule hits as alerts.
pub struct AlertRuleEngine {
    bus: Arc<dyn MessageBus>,
    rules: RuleTable,
    thresholds: AlertThresholds,
    evaluated: AtomicU64,
    alerts_raised: AtomicU64,
    ignored: AtomicU64,
}

impl AlertRuleEngine {
    pub fn new(bus: Arc<dyn MessageBus>, thresholds: AlertThresholds) -> Self {
        Self {
            bus,
            rules: RuleTable::default(),
            thresholds,
            evaluated: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
        }
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    /// Subscribe the engine to `sensor/#` on its bus.
    pub fn attach(self) -> Result<Arc<Self>, BusError> {
        let engine = Arc::new(self);
        let pattern = format!("{SENSOR_ROOT}/{MULTI_LEVEL_WILDCARD}");
        engine
            .bus
            .subscribe(&pattern, Arc::clone(&engine) as Arc<dyn MessageHandler>)?;
        info!(pattern = pattern.as_str(), "Alert rule engine attached");
        Ok(engine)
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Evaluate one reading without publishing.
    pub fn evaluate(&self, reading: &Reading) -> Option<AlertEvent> {
        let predicate = self.rules.lookup(reading.scenario, reading.sensor_type)?;
        let hit = predicate(reading, &self.thresholds)?;
        Some(AlertEvent {
            sensor_id: reading.sensor_id.clone(),
            message: hit.message,
            value: hit.value,
            timestamp: wire_time::now(),
        })
    }

    /// Decode, evaluate and publish. Returns the alert that was raised.
    pub fn process(&self, message: &Message) -> Result<Option<AlertEvent>, HandlerError> {
        let wire: WireReading = message.decode()?;
        let reading = match Reading::try_from(wire) {
            Ok(reading) => reading,
            Err(e) if e.is_unrecognised() => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
                debug!(topic = message.topic.as_str(), error = %e, "No rule for sensor class");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.evaluated.fetch_add(1, Ordering::Relaxed);
        let Some(alert) = self.evaluate(&reading) else {
            return Ok(None);
        };

        let topic = topic::alert_topic(reading.scenario, reading.sensor_type);
        publish_json(self.bus.as_ref(), &topic, &alert)
            .map_err(|e| HandlerError::Failed(format!("failed to publish alert: {e}")))?;
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
        debug!(
            sensor_id = alert.sensor_id.as_str(),
            topic = topic.as_str(),
            alert = alert.message.as_str(),
            "Alert raised"
        );
        Ok(Some(alert))
    }

    pub fn stats(&self) -> RuleEngineStats {
        RuleEngineStats {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

impl MessageHandler for AlertRuleEngine {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.process(message).map(|_| ())
    }
}
