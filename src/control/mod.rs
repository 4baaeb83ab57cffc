//! Actuator control
//!
//! Two independent rules drive two binary outputs: a stateless illumination
//! threshold and a thermal hysteresis with a delayed shutoff. Both run inside
//! one engine task fed by [`ControlHandle`].

pub mod actuator;
pub mod engine;
pub mod illumination;
pub mod thermal;

pub use actuator::{ActuatorState, MemoryOutput, OutputLine};
pub use engine::{ActuatorControlEngine, ControlCommand, ControlHandle, ControlSnapshot, Sensor};
pub use illumination::IlluminationRule;
pub use thermal::{ThermalPhase, ThermalRule, ThermalTransition};
