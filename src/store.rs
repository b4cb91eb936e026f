//! Bounded in-memory telemetry window for dashboards.
//!
//! Readings are kept per (scenario, sensor type) in fixed-capacity FIFO
//! series; alerts go to a newest-first log of fixed size. Readers get a
//! copy, so a render pass never holds the store's locks.

use crate::broker::{BusError, HandlerError, Message, MessageBus, MessageHandler};
use crate::reading::{AlertEvent, Reading, Scenario, SensorType, WireReading};
use crate::topic::{self, ALERT_ROOT, MULTI_LEVEL_WILDCARD, SENSOR_ROOT};
use heapless::Deque;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub const DEFAULT_SERIES_CAPACITY: usize = 100;
pub const ALERT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub scenario: Scenario,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
}

impl SeriesKey {
    pub fn new(scenario: Scenario, sensor_type: SensorType) -> Self {
        Self {
            scenario,
            sensor_type,
        }
    }
}

/// FIFO of the most recent readings. Never holds more than `capacity`.
#[derive(Debug, Clone)]
pub struct BoundedSeries {
    capacity: usize,
    readings: VecDeque<Reading>,
}

impl BoundedSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a reading, returning the evicted oldest one when full.
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        let evicted = if self.readings.len() == self.capacity {
            self.readings.pop_front()
        } else {
            None
        };
        self.readings.push_back(reading);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn to_vec(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }
}

/// An alert together with the topic coordinates it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub scenario: Scenario,
    /// Raw topic segment, unknown classes are logged too.
    pub sensor_type: String,
    #[serde(flatten)]
    pub event: AlertEvent,
}

/// Newest-first alert log with a fixed number of slots.
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    entries: Deque<AlertRecord, ALERT_LOG_CAPACITY>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an alert, dropping the oldest entry when the log is full.
    pub fn push(&mut self, record: AlertRecord) -> Option<AlertRecord> {
        let evicted = if self.entries.is_full() {
            self.entries.pop_back()
        } else {
            None
        };
        // A slot is free at this point.
        let _ = self.entries.push_front(record);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertRecord> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<AlertRecord> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub scenario: Scenario,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub capacity: usize,
    pub readings: Vec<Reading>,
}

impl SeriesSnapshot {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.scenario, self.sensor_type)
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }
}

/// Immutable copy of the store's contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub series: Vec<SeriesSnapshot>,
    /// Newest first.
    pub alerts: Vec<AlertRecord>,
}

impl TelemetrySnapshot {
    pub fn series_for(&self, key: SeriesKey) -> Option<&SeriesSnapshot> {
        self.series.iter().find(|series| series.key() == key)
    }

    /// Restrict the snapshot to one scenario.
    #[must_use]
    pub fn for_scenario(&self, scenario: Scenario) -> Self {
        Self {
            series: self
                .series
                .iter()
                .filter(|series| series.scenario == scenario)
                .cloned()
                .collect(),
            alerts: self
                .alerts
                .iter()
                .filter(|record| record.scenario == scenario)
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|series| series.readings.is_empty()) && self.alerts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub readings: u64,
    pub alerts: u64,
    pub evicted: u64,
    pub ignored: u64,
}

/// Pass-through bus subscriber holding the recent telemetry window.
pub struct TelemetryStore {
    capacity: usize,
    series: Mutex<BTreeMap<SeriesKey, BoundedSeries>>,
    alerts: Mutex<AlertLog>,
    readings_recorded: AtomicU64,
    alerts_recorded: AtomicU64,
    evicted: AtomicU64,
    ignored: AtomicU64,
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: Mutex::new(BTreeMap::new()),
            alerts: Mutex::new(AlertLog::new()),
            readings_recorded: AtomicU64::new(0),
            alerts_recorded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe the store to `sensor/#` and `alerts/#`.
    pub fn attach(self, bus: &dyn MessageBus) -> Result<Arc<Self>, BusError> {
        let store = Arc::new(self);
        for root in [SENSOR_ROOT, ALERT_ROOT] {
            let pattern = format!("{root}/{MULTI_LEVEL_WILDCARD}");
            bus.subscribe(&pattern, Arc::clone(&store) as Arc<dyn MessageHandler>)?;
            info!(pattern = pattern.as_str(), "Telemetry store attached");
        }
        Ok(store)
    }

    pub fn record_reading(&self, reading: Reading) {
        let key = SeriesKey::new(reading.scenario, reading.sensor_type);
        let evicted = {
            let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
            series
                .entry(key)
                .or_insert_with(|| BoundedSeries::new(self.capacity))
                .push(reading)
        };
        self.readings_recorded.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_alert(&self, record: AlertRecord) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        self.alerts_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn series(&self, key: SeriesKey) -> Option<Vec<Reading>> {
        self.series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(BoundedSeries::to_vec)
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    /// Copy the current contents. Both locks are held together, so the copy
    /// is a single point in time. Readings and alerts arrive on separate
    /// subscriptions, so an alert can still be recorded before the reading
    /// that raised it.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        TelemetrySnapshot {
            series: series
                .iter()
                .map(|(key, series)| SeriesSnapshot {
                    scenario: key.scenario,
                    sensor_type: key.sensor_type,
                    capacity: series.capacity(),
                    readings: series.to_vec(),
                })
                .collect(),
            alerts: alerts.to_vec(),
        }
    }

    pub fn scenario_snapshot(&self, scenario: Scenario) -> TelemetrySnapshot {
        self.snapshot().for_scenario(scenario)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            readings: self.readings_recorded.load(Ordering::Relaxed),
            alerts: self.alerts_recorded.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }

    fn ignore(&self, topic: &str, reason: &str) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
        debug!(topic, reason, "Store ignored message");
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_CAPACITY)
    }
}

impl MessageHandler for TelemetryStore {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let Some(route) = topic::parse_route(&message.topic) else {
            self.ignore(&message.topic, "unroutable topic");
            return Ok(());
        };

        match route.root {
            SENSOR_ROOT => {
                let wire: WireReading = message.decode()?;
                match Reading::try_from(wire) {
                    Ok(reading) => self.record_reading(reading),
                    Err(e) if e.is_unrecognised() => self.ignore(&message.topic, "unknown sensor class"),
                    Err(e) => return Err(e.into()),
                }
            }
            ALERT_ROOT => {
                let event: AlertEvent = message.decode()?;
                self.record_alert(AlertRecord {
                    scenario: route.scenario,
                    sensor_type: route.sensor_type.to_string(),
                    event,
                });
            }
            _ => self.ignore(&message.topic, "unknown root"),
        }
        Ok(())
    }
}
