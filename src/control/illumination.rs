//! Illumination threshold rule
//!
//! Stateless: every reading fully determines the output.

use super::actuator::ActuatorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IlluminationRule {
    /// Readings strictly below this switch the lights on
    pub threshold: i32,
}

impl IlluminationRule {
    pub fn new(threshold: i32) -> Self {
        Self { threshold }
    }

    /// Desired output for a reading (pure function)
    pub fn decide(&self, value: i32) -> bool {
        value < self.threshold
    }

    /// Apply a reading; returns the new output level
    pub fn apply(&self, state: &mut ActuatorState, value: i32) -> bool {
        state.output_level = self.decide(value);
        state.pending_off_since = None;
        state.output_level
    }
}

impl Default for IlluminationRule {
    fn default() -> Self {
        Self::new(3)
    }
}
