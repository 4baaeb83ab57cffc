//! Actuator control engine
//!
//! A single task owns both actuator states and both output lines. Inbound
//! readings and periodic checks arrive on one bounded queue, so a reading
//! that starts a shutoff timer can never race the check that evaluates it,
//! and an output line is only ever written right after the decision that
//! produced its level.

use super::actuator::{ActuatorState, OutputLine};
use super::illumination::IlluminationRule;
use super::thermal::{ThermalPhase, ThermalRule, ThermalTransition};
use crate::config::ControlSection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Which rule a reading feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    Illumination,
    Temperature,
}

/// Messages accepted by the engine task
#[derive(Debug)]
pub enum ControlCommand {
    Reading { sensor: Sensor, value: i32 },
    /// Periodic thermal shutoff check
    Tick,
    Snapshot(oneshot::Sender<ControlSnapshot>),
}

/// Point-in-time view of the engine, used by telemetry and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub illumination: ActuatorState,
    pub thermal: ActuatorState,
    pub thermal_phase: ThermalPhase,
    pub last_illumination: Option<i32>,
    pub last_temperature: Option<i32>,
}

impl ControlSnapshot {
    pub fn lights_on(&self) -> bool {
        self.illumination.output_level
    }

    pub fn climate_on(&self) -> bool {
        self.thermal.output_level
    }
}

pub struct ActuatorControlEngine {
    illumination_rule: IlluminationRule,
    thermal_rule: ThermalRule,
    illumination: ActuatorState,
    thermal: ActuatorState,
    lights: Arc<dyn OutputLine>,
    climate: Arc<dyn OutputLine>,
    last_illumination: Option<i32>,
    last_temperature: Option<i32>,
}

impl ActuatorControlEngine {
    /// Both outputs start off and are driven low immediately
    pub fn new(
        illumination_rule: IlluminationRule,
        thermal_rule: ThermalRule,
        lights: Arc<dyn OutputLine>,
        climate: Arc<dyn OutputLine>,
    ) -> Self {
        lights.set_level(false);
        climate.set_level(false);
        Self {
            illumination_rule,
            thermal_rule,
            illumination: ActuatorState::default(),
            thermal: ActuatorState::default(),
            lights,
            climate,
            last_illumination: None,
            last_temperature: None,
        }
    }

    pub fn from_config(
        config: &ControlSection,
        lights: Arc<dyn OutputLine>,
        climate: Arc<dyn OutputLine>,
    ) -> Self {
        let thermal_rule = ThermalRule {
            on_above: config.thermal_on_above,
            off_below: config.thermal_off_below,
            shutoff_delay: config.shutoff_delay(),
        };
        Self::new(
            IlluminationRule::new(config.illumination_threshold),
            thermal_rule,
            lights,
            climate,
        )
    }

    /// Apply a sensor reading observed at `now`
    pub fn handle_reading(&mut self, sensor: Sensor, value: i32, now: Instant) {
        match sensor {
            Sensor::Illumination => {
                self.last_illumination = Some(value);
                let on = self.illumination_rule.apply(&mut self.illumination, value);
                debug!(value, on, "Illumination reading applied");
                self.lights.set_level(on);
            }
            Sensor::Temperature => {
                self.last_temperature = Some(value);
                let transition = self.thermal_rule.on_reading(&mut self.thermal, value, now);
                self.log_thermal(transition, Some(value));
                self.climate.set_level(self.thermal.output_level);
            }
        }
    }

    /// Evaluate the pending thermal shutoff at `now`
    pub fn check(&mut self, now: Instant) {
        let transition = self.thermal_rule.check(&mut self.thermal, now);
        self.log_thermal(transition, None);
        if let Some(left) = self.thermal_rule.remaining(&self.thermal, now) {
            debug!(remaining_secs = left.as_secs(), "Thermal shutoff pending");
        }
        self.climate.set_level(self.thermal.output_level);
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            illumination: self.illumination,
            thermal: self.thermal,
            thermal_phase: ThermalRule::phase(&self.thermal),
            last_illumination: self.last_illumination,
            last_temperature: self.last_temperature,
        }
    }

    fn apply(&mut self, command: ControlCommand, now: Instant) {
        match command {
            ControlCommand::Reading { sensor, value } => self.handle_reading(sensor, value, now),
            ControlCommand::Tick => self.check(now),
            ControlCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn log_thermal(&self, transition: ThermalTransition, value: Option<i32>) {
        match transition {
            ThermalTransition::Unchanged => {}
            ThermalTransition::SwitchedOn => info!(?value, "Climate switched on"),
            ThermalTransition::PendingStarted => info!(
                ?value,
                delay_secs = self.thermal_rule.shutoff_delay.as_secs(),
                "Climate shutoff countdown started"
            ),
            ThermalTransition::PendingCancelled => info!(?value, "Climate shutoff cancelled"),
            ThermalTransition::SwitchedOff => info!("Climate switched off after sustained low temperature"),
            ThermalTransition::StaleTimerCleared => debug!("Cleared stale shutoff timer"),
        }
    }

    /// Move the engine into its own task and return a handle to feed it
    pub fn spawn(mut self, queue_capacity: usize) -> (ControlHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(queue_capacity.max(1));
        let span = crate::control_span!(component = "engine");
        let handle = tokio::spawn(
            async move {
                info!("Control engine started");
                while let Some(command) = rx.recv().await {
                    self.apply(command, Instant::now());
                }
                info!("Control engine stopped");
            }
            .instrument(span),
        );
        (ControlHandle { tx }, handle)
    }
}

/// Cloneable sender side of the engine queue
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    /// Enqueue a reading without waiting; returns false if it was dropped
    pub fn try_submit(&self, sensor: Sensor, value: i32) -> bool {
        match self.tx.try_send(ControlCommand::Reading { sensor, value }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(?sensor, value, "Control queue full, reading dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(?sensor, value, "Control engine stopped, reading dropped");
                false
            }
        }
    }

    /// Enqueue a reading, waiting for queue space
    pub async fn submit(&self, sensor: Sensor, value: i32) -> bool {
        self.tx
            .send(ControlCommand::Reading { sensor, value })
            .await
            .is_ok()
    }

    /// Request one thermal shutoff check
    pub async fn tick(&self) -> bool {
        self.tx.send(ControlCommand::Tick).await.is_ok()
    }

    /// Ask the engine for its current state
    pub async fn snapshot(&self) -> Option<ControlSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(ControlCommand::Snapshot(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    /// Spawn the periodic check task
    pub fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // First tick completes immediately, skip it

            loop {
                interval.tick().await;
                if !handle.tick().await {
                    debug!("Control engine gone, ticker exiting");
                    break;
                }
            }
        })
    }
}
