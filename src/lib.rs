//! # Sensor Telemetry Bus
//!
//! An in-process publish/subscribe pipeline for simulated sensor telemetry.
//! Independent producers publish readings on topic-structured channels, a
//! rule engine derives alerts from them, and a bounded store keeps the
//! recent window for dashboards.
//!
//! ## Features
//!
//! - **Simulated sensors**: healthcare, autonomous-vehicle, defense, home-IoT and generic generators
//! - **Topic broker**: `sensor/<scenario>/<type>` routing with `#` tail wildcards
//! - **Isolation**: a producer can be cut off from the bus and recovered without restarting it
//! - **Alert rules**: stateless per-class threshold and event predicates
//! - **Bounded store**: fixed-capacity series and a newest-first alert log
//! - **TCP bridge**: newline-delimited JSON control and subscription protocol
//!
//! ## Quick Start
//!
//! ```no_run
//! use sensorbus::{Pipeline, SimulationConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::build(SimulationConfig::default())?;
//! pipeline.controller().await.start_all()?;
//!
//! tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//! let snapshot = pipeline.snapshot(None);
//! println!("{} series, {} alerts", snapshot.series.len(), snapshot.alerts.len());
//!
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`reading`] - Sensor identities, reading values and wire payloads
//! - [`topic`] - Topic composition and wildcard matching
//! - [`broker`] - Bus trait and the in-process broker
//! - [`generators`] - Synthetic value generators per sensor class
//! - [`producer`] - Producer lifecycle and publish loop
//! - [`rules`] - Alert rule engine
//! - [`store`] - Bounded telemetry store
//! - [`controller`] - Producer control by sensor and scenario
//! - [`pipeline`] - Wiring and command execution
//! - [`protocol`], [`bridge`], [`client`] - Remote control over TCP

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod broker;
pub mod client;
pub mod config;
pub mod controller;
pub mod generators;
pub mod pipeline;
pub mod producer;
pub mod protocol;
pub mod reading;
pub mod reconnect;
pub mod rules;
pub mod store;
pub mod topic;
pub mod view;

// Re-export main public types for convenience
pub use broker::{Broker, Message, MessageBus, MessageHandler};
pub use config::SimulationConfig;
pub use controller::SimulationController;
pub use pipeline::Pipeline;
pub use producer::{Producer, ProducerState};
pub use reading::{AlertEvent, Reading, ReadingValue, Scenario, SensorIdentity, SensorType};
pub use rules::AlertRuleEngine;
pub use store::TelemetryStore;
