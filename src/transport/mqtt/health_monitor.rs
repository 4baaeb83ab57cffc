//! Pure reconnection decision logic for the broker session
//!
//! Nothing here performs I/O; the session event loop asks these functions
//! what to do and then does it.

use super::connection::{ReconnectConfig, SessionState};
use crate::link::LinkState;
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let delay_ms = config.calculate_backoff_delay(current_attempts + 1);
        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay_ms,
        }
    }

    /// The session may only reconnect over an attached link
    pub fn link_allows_reconnect(link: LinkState) -> bool {
        link == LinkState::Attached
    }

    /// Determine next state after a connection event (pure function)
    pub fn determine_next_state(event: &ConnectionEvent) -> SessionState {
        match event {
            ConnectionEvent::ConnAckReceived => SessionState::Connected,
            ConnectionEvent::DisconnectedByBroker
            | ConnectionEvent::NetworkError(_)
            | ConnectionEvent::Stopped => SessionState::Disconnected,
        }
    }

    /// Check if the session state allows publishing (pure function)
    pub fn can_publish(state: SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }

    /// Log a session state transition
    pub fn log_state_transition(from: SessionState, event: &ConnectionEvent) {
        match (from, event) {
            (SessionState::Disconnected, ConnectionEvent::ConnAckReceived) => {
                info!("Broker session established");
            }
            (SessionState::Connected, ConnectionEvent::DisconnectedByBroker) => {
                warn!("Broker closed the session");
            }
            (SessionState::Connected, ConnectionEvent::NetworkError(reason)) => {
                warn!("Broker session lost: {}", reason);
            }
            (SessionState::Disconnected, ConnectionEvent::NetworkError(reason)) => {
                error!("Broker unreachable: {}", reason);
            }
            (_, ConnectionEvent::Stopped) => {
                info!("Broker session stopped");
            }
            _ => {}
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Network or protocol error
    NetworkError(String),
    /// Local shutdown
    Stopped,
}
