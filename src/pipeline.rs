//! Wires broker, rule engine, telemetry store and producers together and
//! executes control commands against them.

use crate::broker::{Broker, BrokerStats, BusError, MessageBus};
use crate::config::{ConfigError, SimulationConfig};
use crate::controller::{ControlError, ControlOutcome, SimulationController};
use crate::generators::GeneratorTable;
use crate::producer::{ProducerState, ProducerStatus};
use crate::protocol::{CommandResponse, CommandType, ControlCommand, ProtocolHandler, ResponseStatus};
use crate::reading::Scenario;
use crate::rules::{AlertRuleEngine, RuleEngineStats};
use crate::store::{StoreStats, TelemetrySnapshot, TelemetryStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("failed to encode response data: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("`{0}` is handled by the client connection")]
    ConnectionCommand(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub uptime_seconds: u64,
    pub command_count: u64,
    pub producers: Vec<ProducerStatus>,
    pub broker: BrokerStats,
    pub rules: RuleEngineStats,
    pub store: StoreStats,
}

/// A running telemetry pipeline.
pub struct Pipeline {
    config: SimulationConfig,
    broker: Broker,
    bus: Arc<dyn MessageBus>,
    engine: Arc<AlertRuleEngine>,
    store: Arc<TelemetryStore>,
    controller: Mutex<SimulationController>,
    protocol: ProtocolHandler,
    started_at: Instant,
    command_count: AtomicU64,
}

impl Pipeline {
    /// Build the pipeline with the built-in generators. Must be called
    /// inside a tokio runtime; producers start stopped.
    pub fn build(config: SimulationConfig) -> Result<Self, PipelineError> {
        Self::with_generators(config, &GeneratorTable::default())
    }

    pub fn with_generators(config: SimulationConfig, generators: &GeneratorTable) -> Result<Self, PipelineError> {
        config.validate()?;

        let broker = Broker::with_queue_capacity(config.subscriber_queue_capacity);
        let bus: Arc<dyn MessageBus> = Arc::new(broker.clone());
        let engine = AlertRuleEngine::new(Arc::clone(&bus), config.thresholds).attach()?;
        let store = TelemetryStore::new(config.series_capacity).attach(bus.as_ref())?;
        let controller = SimulationController::from_config(&config, &bus, generators)?;

        info!(
            producers = controller.len(),
            series_capacity = config.series_capacity,
            "Pipeline built"
        );

        Ok(Self {
            config,
            broker,
            bus,
            engine,
            store,
            controller: Mutex::new(controller),
            protocol: ProtocolHandler::new(),
            started_at: Instant::now(),
            command_count: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn engine(&self) -> &Arc<AlertRuleEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub async fn controller(&self) -> MutexGuard<'_, SimulationController> {
        self.controller.lock().await
    }

    pub fn snapshot(&self, scenario: Option<Scenario>) -> TelemetrySnapshot {
        match scenario {
            Some(scenario) => self.store.scenario_snapshot(scenario),
            None => self.store.snapshot(),
        }
    }

    pub async fn status(&self) -> StatusReport {
        let producers = self.controller.lock().await.status();
        StatusReport {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            command_count: self.command_count.load(Ordering::Relaxed),
            producers,
            broker: self.broker.stats(),
            rules: self.engine.stats(),
            store: self.store.stats(),
        }
    }

    /// Execute a control command and describe the result for the client.
    pub async fn execute(&self, command: &ControlCommand) -> CommandResponse {
        self.command_count.fetch_add(1, Ordering::Relaxed);
        debug!(id = command.id, command = command.command_type.name(), "Executing command");

        match self.dispatch(&command.command_type).await {
            Ok((message, data)) => {
                let mut response = self
                    .protocol
                    .create_response(command.id, ResponseStatus::Success, Some(&message));
                response.data = data;
                response
            }
            Err(e) => {
                warn!(id = command.id, command = command.command_type.name(), error = %e, "Command failed");
                let status = if matches!(e, PipelineError::ConnectionCommand(_)) {
                    ResponseStatus::InvalidCommand
                } else {
                    ResponseStatus::Error
                };
                self.protocol
                    .create_response(command.id, status, Some(&e.to_string()))
            }
        }
    }

    async fn dispatch(&self, command_type: &CommandType) -> Result<(String, Option<Value>), PipelineError> {
        let outcome = match command_type {
            CommandType::Ping => return Ok(("pong".to_string(), None)),
            CommandType::Status => {
                let report = self.status().await;
                let running = report
                    .producers
                    .iter()
                    .filter(|p| p.state != ProducerState::Stopped)
                    .count();
                let message = format!("{running}/{} producers active", report.producers.len());
                return Ok((message, Some(serde_json::to_value(&report)?)));
            }
            CommandType::Snapshot { scenario } => {
                let scenario = scenario.as_deref().map(parse_scenario).transpose()?;
                let snapshot = self.snapshot(scenario);
                let message = format!(
                    "{} series, {} alerts",
                    snapshot.series.len(),
                    snapshot.alerts.len()
                );
                return Ok((message, Some(serde_json::to_value(&snapshot)?)));
            }
            CommandType::StartScenario { scenario } => {
                let scenario = parse_scenario(scenario)?;
                self.controller.lock().await.start_scenario(scenario)?
            }
            CommandType::StopScenario { scenario } => {
                let scenario = parse_scenario(scenario)?;
                self.controller.lock().await.stop_scenario(scenario).await?
            }
            CommandType::StartAll => self.controller.lock().await.start_all()?,
            CommandType::StopAll => self.controller.lock().await.stop_all().await?,
            CommandType::StartSensor { sensor_id } => self.controller.lock().await.start_sensor(sensor_id)?,
            CommandType::StopSensor { sensor_id } => {
                self.controller.lock().await.stop_sensor(sensor_id).await?
            }
            CommandType::IsolateSensor { sensor_id } => self.controller.lock().await.isolate(sensor_id)?,
            CommandType::RecoverSensor { sensor_id } => self.controller.lock().await.recover(sensor_id)?,
            CommandType::Subscribe { .. } | CommandType::Unsubscribe => {
                return Err(PipelineError::ConnectionCommand(command_type.name()));
            }
        };
        outcome_reply(&outcome)
    }

    /// Stop every producer, then close the broker. Subscriber tasks drain
    /// and exit.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let stopped = self.controller.lock().await.stop_all().await;
        self.broker.close();
        info!("Pipeline shut down");
        stopped.map(|_| ()).map_err(PipelineError::from)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.broker.close();
    }
}

fn parse_scenario(name: &str) -> Result<Scenario, ControlError> {
    name.parse()
        .map_err(|_| ControlError::UnknownScenario(name.to_string()))
}

fn outcome_reply(outcome: &ControlOutcome) -> Result<(String, Option<Value>), PipelineError> {
    Ok((outcome.message.clone(), Some(serde_json::to_value(outcome)?)))
}
