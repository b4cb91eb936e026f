//! Simulated sensor producers.
//!
//! A producer owns one generator and a publish loop running on its own
//! tokio task. Isolation keeps the loop ticking but suppresses
//! publication, which simulates a network partition without killing the
//! sensor.

use crate::broker::{publish_json, BusError, MessageBus};
use crate::config::ConfigError;
use crate::controller::ControlError;
use crate::generators::{GeneratorFn, GeneratorTable};
use crate::reading::{wire_time, Reading, Scenario, SensorIdentity, SensorType};
use crate::topic;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerState {
    Stopped,
    Running,
    Isolated,
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProducerState::Stopped => "stopped",
            ProducerState::Running => "running",
            ProducerState::Isolated => "isolated",
        })
    }
}

/// Uniform sleep range between two readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishInterval {
    min: Duration,
    max: Duration,
}

impl PublishInterval {
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidInterval {
                min_ms: u64::try_from(min.as_millis()).unwrap_or(u64::MAX),
                max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(Self { min, max })
    }

    pub fn fixed(period: Duration) -> Self {
        Self {
            min: period,
            max: period,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

/// Point-in-time view of a producer, as reported to control clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerStatus {
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub scenario: Scenario,
    pub state: ProducerState,
    pub published: u64,
    pub suppressed: u64,
}

struct Shared {
    identity: SensorIdentity,
    topic: String,
    generator: GeneratorFn,
    bus: Arc<dyn MessageBus>,
    interval: PublishInterval,
    /// Held across the isolation check and the publish call, so once
    /// `isolate` returns no publish is in flight.
    isolated: Mutex<bool>,
    published: AtomicU64,
    suppressed: AtomicU64,
}

impl Shared {
    fn is_isolated(&self) -> bool {
        *self.isolated.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_isolated(&self, isolated: bool) {
        *self.isolated.lock().unwrap_or_else(PoisonError::into_inner) = isolated;
    }

    fn tick(&self, rng: &mut StdRng) {
        let now = wire_time::now();
        let value = (self.generator)(rng, now);
        let reading = Reading::new(&self.identity, value, now);

        let gate = self.isolated.lock().unwrap_or_else(PoisonError::into_inner);
        if *gate {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(sensor_id = self.identity.sensor_id.as_str(), "Producer isolated, reading suppressed");
            return;
        }

        match publish_json(self.bus.as_ref(), &self.topic, &reading) {
            Ok(receivers) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(
                    sensor_id = self.identity.sensor_id.as_str(),
                    topic = self.topic.as_str(),
                    receivers,
                    "Reading published"
                );
            }
            Err(BusError::Closed) => {
                debug!(sensor_id = self.identity.sensor_id.as_str(), "Bus closed, reading dropped");
            }
            Err(e) => {
                warn!(
                    sensor_id = self.identity.sensor_id.as_str(),
                    topic = self.topic.as_str(),
                    error = %e,
                    "Failed to publish reading"
                );
            }
        }
    }
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One simulated sensor.
pub struct Producer {
    shared: Arc<Shared>,
    seed: Option<u64>,
    runs: u64,
    task: Option<RunningTask>,
}

impl Producer {
    /// Build a stopped producer. The sensor type must be declared by the
    /// identity's scenario and have a generator in `generators`.
    pub fn new(
        identity: SensorIdentity,
        generators: &GeneratorTable,
        bus: Arc<dyn MessageBus>,
        interval: PublishInterval,
    ) -> Result<Self, ConfigError> {
        let generator = generators.resolve(&identity)?;
        let topic = topic::reading_topic(identity.scenario, identity.sensor_type);
        Ok(Self {
            shared: Arc::new(Shared {
                identity,
                topic,
                generator,
                bus,
                interval,
                isolated: Mutex::new(false),
                published: AtomicU64::new(0),
                suppressed: AtomicU64::new(0),
            }),
            seed: None,
            runs: 0,
            task: None,
        })
    }

    /// Make the value and interval sequence reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn identity(&self) -> &SensorIdentity {
        &self.shared.identity
    }

    pub fn sensor_id(&self) -> &str {
        &self.shared.identity.sensor_id
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn interval(&self) -> PublishInterval {
        self.shared.interval
    }

    fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn state(&self) -> ProducerState {
        if !self.is_running() {
            ProducerState::Stopped
        } else if self.shared.is_isolated() {
            ProducerState::Isolated
        } else {
            ProducerState::Running
        }
    }

    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    pub fn suppressed(&self) -> u64 {
        self.shared.suppressed.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ProducerStatus {
        let identity = &self.shared.identity;
        ProducerStatus {
            sensor_id: identity.sensor_id.clone(),
            sensor_type: identity.sensor_type,
            scenario: identity.scenario,
            state: self.state(),
            published: self.published(),
            suppressed: self.suppressed(),
        }
    }

    /// Spawn the publish loop. Calling it on a running producer is a no-op
    /// that reports the current state.
    pub fn start(&mut self) -> Result<ProducerState, ControlError> {
        if self.is_running() {
            return Ok(self.state());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ControlError::NoRuntime)?;

        self.task = None;
        self.shared.set_isolated(false);

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.runs)),
            None => StdRng::from_entropy(),
        };
        self.runs += 1;

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(publish_loop(Arc::clone(&self.shared), rng, cancel.clone()));
        self.task = Some(RunningTask { cancel, handle });

        info!(
            sensor_id = self.sensor_id(),
            topic = self.topic(),
            "Producer started"
        );
        Ok(ProducerState::Running)
    }

    /// Cancel the publish loop and wait for it to exit. Nothing is
    /// published by this producer after `stop` returns.
    pub async fn stop(&mut self) -> Result<ProducerState, ControlError> {
        let Some(task) = self.task.take() else {
            return Ok(ProducerState::Stopped);
        };
        task.cancel.cancel();
        let joined = task.handle.await;
        self.shared.set_isolated(false);

        match joined {
            Ok(()) => {
                info!(sensor_id = self.sensor_id(), "Producer stopped");
                Ok(ProducerState::Stopped)
            }
            Err(e) => {
                error!(sensor_id = self.sensor_id(), error = %e, "Producer task failed");
                Err(ControlError::TaskFailed {
                    sensor_id: self.sensor_id().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Suppress publication while keeping the loop alive.
    pub fn isolate(&self) -> Result<ProducerState, ControlError> {
        if !self.is_running() {
            return Err(ControlError::NotRunning(self.sensor_id().to_string()));
        }
        self.shared.set_isolated(true);
        info!(sensor_id = self.sensor_id(), "Producer isolated");
        Ok(ProducerState::Isolated)
    }

    pub fn recover(&self) -> Result<ProducerState, ControlError> {
        if !self.is_running() {
            return Err(ControlError::NotRunning(self.sensor_id().to_string()));
        }
        self.shared.set_isolated(false);
        info!(sensor_id = self.sensor_id(), "Producer recovered");
        Ok(ProducerState::Running)
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("identity", &self.shared.identity)
            .field("interval", &self.shared.interval)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
        }
    }
}

async fn publish_loop(shared: Arc<Shared>, mut rng: StdRng, cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        shared.tick(&mut rng);
        let delay = shared.interval.sample(&mut rng);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    debug!(sensor_id = shared.identity.sensor_id.as_str(), "Publish loop exited");
}
