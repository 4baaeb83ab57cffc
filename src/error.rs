//! Error types for the gateway engine
//!
//! Layer-specific errors (`ConfigError`, `LinkError`, `SessionError`) live next
//! to the code that raises them; `GatewayError` is the taxonomy surfaced to
//! callers of the orchestrator.

use crate::config::ConfigError;
use crate::link::LinkError;
use crate::transport::mqtt::SessionError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Link attach did not complete within {waited:?}")]
    LinkTimeout { waited: Duration },

    #[error("Broker session did not come up within {waited:?}")]
    SessionTimeout { waited: Duration },

    #[error("Publish to '{topic}' failed: {reason}")]
    PublishFailure { topic: String, reason: String },

    #[error("Subscribe to '{topic}' failed: {reason}")]
    SubscribeFailure { topic: String, reason: String },

    #[error("Failed to start task '{task}': {reason}")]
    TaskSpawn { task: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl GatewayError {
    /// Create publish failure error
    pub fn publish_failure<T: Into<String>, R: ToString>(topic: T, reason: R) -> Self {
        Self::PublishFailure {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Create subscribe failure error
    pub fn subscribe_failure<T: Into<String>, R: ToString>(topic: T, reason: R) -> Self {
        Self::SubscribeFailure {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Create task spawn error
    pub fn task_spawn<T: Into<String>, R: ToString>(task: T, reason: R) -> Self {
        Self::TaskSpawn {
            task: task.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort startup.
    ///
    /// A session timeout leaves the gateway running in degraded mode and
    /// publish/subscribe failures are only counted; a link timeout or a task
    /// that could not be started ends initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::LinkTimeout { .. }
                | GatewayError::TaskSpawn { .. }
                | GatewayError::Config(_)
        )
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            GatewayError::LinkTimeout {
                waited: Duration::from_secs(30),
            },
            GatewayError::SessionTimeout {
                waited: Duration::from_secs(20),
            },
            GatewayError::publish_failure("demo/central/status", "not connected"),
            GatewayError::subscribe_failure("casa/sala/temperatura", "no session"),
            GatewayError::task_spawn("telemetry", "runtime gone"),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GatewayError::LinkTimeout {
            waited: Duration::from_secs(30)
        }
        .is_fatal());
        assert!(GatewayError::task_spawn("watchdog", "boom").is_fatal());
        assert!(!GatewayError::SessionTimeout {
            waited: Duration::from_secs(20)
        }
        .is_fatal());
        assert!(!GatewayError::publish_failure("t", "x").is_fatal());
        assert!(!GatewayError::subscribe_failure("t", "x").is_fatal());
    }

    #[test]
    fn test_publish_failure_carries_topic() {
        let err = GatewayError::publish_failure("demo/central/health", "session disconnected");
        match err {
            GatewayError::PublishFailure { topic, reason } => {
                assert_eq!(topic, "demo/central/health");
                assert_eq!(reason, "session disconnected");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
