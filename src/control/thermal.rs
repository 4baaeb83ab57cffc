//! Thermal hysteresis rule
//!
//! The device switches on above the upper threshold at once, but only
//! switches off after readings below the lower threshold have persisted for
//! the shutoff delay. A reading inside the band cancels a pending shutoff.

use super::actuator::ActuatorState;
use std::time::Duration;
use tokio::time::Instant;

/// Observable phase of the thermal device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalPhase {
    Off,
    On,
    PendingOff,
}

/// What a reading or check did to the thermal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalTransition {
    Unchanged,
    SwitchedOn,
    PendingStarted,
    PendingCancelled,
    SwitchedOff,
    /// Output was off but a timer was still recorded
    StaleTimerCleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalRule {
    /// Readings strictly above this switch the device on
    pub on_above: i32,
    /// Readings strictly below this start the shutoff countdown
    pub off_below: i32,
    /// How long the countdown must run before the device switches off
    pub shutoff_delay: Duration,
}

impl Default for ThermalRule {
    fn default() -> Self {
        Self {
            on_above: 23,
            off_below: 20,
            shutoff_delay: Duration::from_secs(600),
        }
    }
}

impl ThermalRule {
    pub fn phase(state: &ActuatorState) -> ThermalPhase {
        match (state.output_level, state.pending_off_since) {
            (false, _) => ThermalPhase::Off,
            (true, None) => ThermalPhase::On,
            (true, Some(_)) => ThermalPhase::PendingOff,
        }
    }

    /// Apply a temperature reading taken at `now`
    pub fn on_reading(
        &self,
        state: &mut ActuatorState,
        value: i32,
        now: Instant,
    ) -> ThermalTransition {
        if value > self.on_above {
            let was_on = state.output_level;
            let was_pending = state.pending_off_since.take().is_some();
            state.output_level = true;
            return match (was_on, was_pending) {
                (false, _) => ThermalTransition::SwitchedOn,
                (true, true) => ThermalTransition::PendingCancelled,
                (true, false) => ThermalTransition::Unchanged,
            };
        }

        if value < self.off_below {
            if !state.output_level {
                return match state.pending_off_since.take() {
                    Some(_) => ThermalTransition::StaleTimerCleared,
                    None => ThermalTransition::Unchanged,
                };
            }
            if state.pending_off_since.is_none() {
                state.pending_off_since = Some(now);
                return ThermalTransition::PendingStarted;
            }
            return ThermalTransition::Unchanged;
        }

        match state.pending_off_since.take() {
            Some(_) => ThermalTransition::PendingCancelled,
            None => ThermalTransition::Unchanged,
        }
    }

    /// Periodic check: switch off once the countdown has matured
    pub fn check(&self, state: &mut ActuatorState, now: Instant) -> ThermalTransition {
        if !state.output_level {
            return match state.pending_off_since.take() {
                Some(_) => ThermalTransition::StaleTimerCleared,
                None => ThermalTransition::Unchanged,
            };
        }

        match state.pending_off_since {
            Some(since) if now.saturating_duration_since(since) >= self.shutoff_delay => {
                state.output_level = false;
                state.pending_off_since = None;
                ThermalTransition::SwitchedOff
            }
            _ => ThermalTransition::Unchanged,
        }
    }

    /// Time left before a pending shutoff matures
    pub fn remaining(&self, state: &ActuatorState, now: Instant) -> Option<Duration> {
        state
            .pending_off_since
            .map(|since| {
                self.shutoff_delay
                    .saturating_sub(now.saturating_duration_since(since))
            })
    }
}
