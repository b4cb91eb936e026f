//! Producer lifecycle control by sensor id and by scenario.

use crate::broker::MessageBus;
use crate::config::{ConfigError, SimulationConfig};
use crate::generators::GeneratorTable;
use crate::producer::{Producer, ProducerState, ProducerStatus};
use crate::reading::Scenario;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown sensor `{0}`")]
    UnknownSensor(String),
    #[error("no sensors configured for scenario `{0}`")]
    UnknownScenario(String),
    #[error("producer `{0}` is not running")]
    NotRunning(String),
    #[error("producer control requires a running tokio runtime")]
    NoRuntime,
    #[error("producer `{sensor_id}` task failed: {reason}")]
    TaskFailed { sensor_id: String, reason: String },
}

/// Result of a successful control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlOutcome {
    pub message: String,
    pub producers: Vec<ProducerStatus>,
}

impl ControlOutcome {
    fn new(message: impl Into<String>, producers: Vec<ProducerStatus>) -> Self {
        Self {
            message: message.into(),
            producers,
        }
    }
}

/// Owns every producer of a simulation.
#[derive(Debug, Default)]
pub struct SimulationController {
    producers: BTreeMap<String, Producer>,
}

impl SimulationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build stopped producers for every active sensor in `config`.
    pub fn from_config(
        config: &SimulationConfig,
        bus: &Arc<dyn MessageBus>,
        generators: &GeneratorTable,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut controller = Self::new();
        for (offset, identity) in (0u64..).zip(config.active_sensors()) {
            let interval = config.interval_for(identity.scenario)?;
            let mut producer = Producer::new(identity.clone(), generators, Arc::clone(bus), interval)?;
            if let Some(seed) = config.seed {
                producer = producer.with_seed(seed.wrapping_add(offset));
            }
            controller.add_producer(producer)?;
        }
        info!(producers = controller.producers.len(), "Simulation controller ready");
        Ok(controller)
    }

    pub fn add_producer(&mut self, producer: Producer) -> Result<(), ConfigError> {
        let sensor_id = producer.sensor_id().to_string();
        if self.producers.contains_key(&sensor_id) {
            return Err(ConfigError::DuplicateSensor(sensor_id));
        }
        self.producers.insert(sensor_id, producer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn producer(&self, sensor_id: &str) -> Option<&Producer> {
        self.producers.get(sensor_id)
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }

    /// Scenarios with at least one configured producer.
    pub fn scenarios(&self) -> BTreeSet<Scenario> {
        self.producers
            .values()
            .map(|producer| producer.identity().scenario)
            .collect()
    }

    pub fn status(&self) -> Vec<ProducerStatus> {
        self.producers.values().map(Producer::status).collect()
    }

    pub fn scenario_status(&self, scenario: Scenario) -> Vec<ProducerStatus> {
        self.producers
            .values()
            .filter(|producer| producer.identity().scenario == scenario)
            .map(Producer::status)
            .collect()
    }

    fn get(&self, sensor_id: &str) -> Result<&Producer, ControlError> {
        self.producers
            .get(sensor_id)
            .ok_or_else(|| ControlError::UnknownSensor(sensor_id.to_string()))
    }

    fn get_mut(&mut self, sensor_id: &str) -> Result<&mut Producer, ControlError> {
        self.producers
            .get_mut(sensor_id)
            .ok_or_else(|| ControlError::UnknownSensor(sensor_id.to_string()))
    }

    fn require_scenario(&self, scenario: Scenario) -> Result<(), ControlError> {
        if self.scenarios().contains(&scenario) {
            Ok(())
        } else {
            Err(ControlError::UnknownScenario(scenario.to_string()))
        }
    }

    pub fn start_sensor(&mut self, sensor_id: &str) -> Result<ControlOutcome, ControlError> {
        let producer = self.get_mut(sensor_id)?;
        let state = producer.start()?;
        Ok(ControlOutcome::new(
            format!("{sensor_id} is {state}"),
            vec![producer.status()],
        ))
    }

    pub async fn stop_sensor(&mut self, sensor_id: &str) -> Result<ControlOutcome, ControlError> {
        let producer = self.get_mut(sensor_id)?;
        let state = producer.stop().await?;
        Ok(ControlOutcome::new(
            format!("{sensor_id} is {state}"),
            vec![producer.status()],
        ))
    }

    pub fn isolate(&self, sensor_id: &str) -> Result<ControlOutcome, ControlError> {
        let producer = self.get(sensor_id)?;
        let state = producer.isolate()?;
        Ok(ControlOutcome::new(
            format!("{sensor_id} is {state}"),
            vec![producer.status()],
        ))
    }

    pub fn recover(&self, sensor_id: &str) -> Result<ControlOutcome, ControlError> {
        let producer = self.get(sensor_id)?;
        let state = producer.recover()?;
        Ok(ControlOutcome::new(
            format!("{sensor_id} is {state}"),
            vec![producer.status()],
        ))
    }

    pub fn start_scenario(&mut self, scenario: Scenario) -> Result<ControlOutcome, ControlError> {
        self.require_scenario(scenario)?;
        for producer in self
            .producers
            .values_mut()
            .filter(|producer| producer.identity().scenario == scenario)
        {
            producer.start()?;
        }
        info!(scenario = scenario.as_str(), "Scenario started");
        Ok(ControlOutcome::new(
            format!("{scenario} started"),
            self.scenario_status(scenario),
        ))
    }

    /// Stop every producer of `scenario`. All producers are stopped even
    /// when one of them fails; the first failure is reported.
    pub async fn stop_scenario(&mut self, scenario: Scenario) -> Result<ControlOutcome, ControlError> {
        self.require_scenario(scenario)?;
        let mut first_error = None;
        for producer in self
            .producers
            .values_mut()
            .filter(|producer| producer.identity().scenario == scenario)
        {
            if let Err(e) = producer.stop().await {
                warn!(sensor_id = producer.sensor_id(), error = %e, "Failed to stop producer cleanly");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        info!(scenario = scenario.as_str(), "Scenario stopped");
        Ok(ControlOutcome::new(
            format!("{scenario} stopped"),
            self.scenario_status(scenario),
        ))
    }

    pub fn start_all(&mut self) -> Result<ControlOutcome, ControlError> {
        for producer in self.producers.values_mut() {
            producer.start()?;
        }
        info!(producers = self.producers.len(), "All producers started");
        Ok(ControlOutcome::new("all producers started", self.status()))
    }

    pub async fn stop_all(&mut self) -> Result<ControlOutcome, ControlError> {
        let mut first_error = None;
        for producer in self.producers.values_mut() {
            if let Err(e) = producer.stop().await {
                warn!(sensor_id = producer.sensor_id(), error = %e, "Failed to stop producer cleanly");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        info!(producers = self.producers.len(), "All producers stopped");
        Ok(ControlOutcome::new("all producers stopped", self.status()))
    }

    pub fn running(&self) -> usize {
        self.producers
            .values()
            .filter(|producer| producer.state() != ProducerState::Stopped)
            .count()
    }
}
