//! Gateway node - connectivity and control engine
//!
//! The engine of an MQTT sensor/actuator gateway: it keeps a network link
//! and a broker session alive, routes inbound sensor readings into two
//! actuator control rules and exposes publish, statistics and health to the
//! periodic reporting tasks.
//!
//! # Overview
//!
//! - [`link`] - network link state machine, driver seam and watchdog
//! - [`transport`] - broker client seam and the MQTT session
//! - [`routing`] - inbound message routing and reading parsing
//! - [`control`] - illumination and thermal rules behind a single-owner task
//! - [`observability`] - statistics, health snapshot and logging setup
//! - [`gateway`] - startup sequencing and reporting tasks
//!
//! # Quick Start
//!
//! ```rust
//! use gateway_node::control::{IlluminationRule, ThermalRule, ThermalTransition};
//! use gateway_node::control::ActuatorState;
//! use tokio::time::Instant;
//!
//! // Dark outside: lights on
//! assert!(IlluminationRule::default().decide(1));
//!
//! // Hot then cool: climate on, then the shutoff timer starts
//! let rule = ThermalRule::default();
//! let mut state = ActuatorState::default();
//! let now = Instant::now();
//! assert_eq!(rule.on_reading(&mut state, 25, now), ThermalTransition::SwitchedOn);
//! assert_eq!(rule.on_reading(&mut state, 18, now), ThermalTransition::PendingStarted);
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod gateway;
pub mod link;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod testing;
pub mod transport;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Orchestrator, StartupMode};
pub use observability::{HealthSnapshot, Statistics, StatisticsRegistry};
