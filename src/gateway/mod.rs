//! Gateway assembly: startup sequencing and periodic reporting

pub mod orchestrator;
pub mod reporting;

pub use orchestrator::{Orchestrator, StartupMode};
pub use reporting::{evaluate_alerts, ReportingContext};
