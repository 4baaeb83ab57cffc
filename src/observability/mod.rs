//! Observability for the gateway
//!
//! Structured logging, communication statistics and on-demand health
//! snapshots.

pub mod health;
pub mod logging;
pub mod statistics;

pub use health::{HealthSnapshot, HostProbe, SystemProbe};
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use statistics::{StatEvent, Statistics, StatisticsRegistry};

// Span macros for structured logging
pub use logging::{control_span, lifecycle_span, link_span, mqtt_span};
