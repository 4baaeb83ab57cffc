//! Actuator state and output lines

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;
use tracing::info;

/// Per-device decision state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorState {
    pub output_level: bool,
    pub pending_off_since: Option<Instant>,
}

/// A binary output line driving one device
pub trait OutputLine: Send + Sync {
    /// Drive the line; `true` switches the device on
    fn set_level(&self, on: bool);

    /// Level last written
    fn level(&self) -> bool;

    /// Human-readable name used in logs
    fn name(&self) -> &str;
}

/// Output line kept in memory, for hosts without GPIO
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    level: AtomicBool,
}

impl MemoryOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: AtomicBool::new(false),
        }
    }
}

impl OutputLine for MemoryOutput {
    fn set_level(&self, on: bool) {
        let previous = self.level.swap(on, Ordering::SeqCst);
        if previous != on {
            info!(output = %self.name, on, "Output switched");
        }
    }

    fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actuator_state_starts_off() {
        let state = ActuatorState::default();
        assert!(!state.output_level);
        assert!(state.pending_off_since.is_none());
    }

    #[test]
    fn test_memory_output_tracks_level() {
        let line = MemoryOutput::new("lights");
        assert!(!line.level());
        line.set_level(true);
        assert!(line.level());
        line.set_level(true);
        assert!(line.level());
        line.set_level(false);
        assert!(!line.level());
        assert_eq!(line.name(), "lights");
    }
}
