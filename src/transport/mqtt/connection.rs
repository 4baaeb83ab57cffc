//! Pure connection state management for the broker session
//!
//! Session state, reconnect backoff, error types and construction of the
//! rumqttc options (broker address, credentials, last will).

use crate::config::MqttSection;
use crate::protocol::topics::{TopicError, STATUS_OFFLINE};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Broker session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![1000, 2000, 5000],
            sustained_delay: 10_000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Broker session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("No broker session")]
    NoSession,
    #[error("Broker session not connected")]
    NotConnected,
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Unsubscribe failed")]
    UnsubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
    #[error("No ConnAck within {waited:?}")]
    ConnectTimeout { waited: Duration },
    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),
    #[error("Session already started")]
    AlreadyStarted,
}

/// Map a numeric QoS level (0, 1, 2) to rumqttc's enum
pub fn qos_from_level(level: u8) -> Result<QoS, SessionError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(SessionError::InvalidQos(other)),
    }
}

/// Client id unique per process start so a restarted gateway never
/// collides with its own stale session
pub fn client_id(device_id: &str) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{device_id}-{timestamp}")
}

/// Build rumqttc options from config, registering `offline` as last will
/// on `status_topic` (QoS 1, retained)
pub fn configure_mqtt_options(
    device_id: &str,
    config: &MqttSection,
    status_topic: &str,
) -> Result<MqttOptions, SessionError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(client_id(device_id), host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.get_username() {
        let password = config.get_password().unwrap_or_default();
        mqtt_options.set_credentials(&username, &password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_max_packet_size(Some(config.max_packet_size));

    let lwt = LastWill::new(status_topic, STATUS_OFFLINE, QoS::AtLeastOnce, true, None);
    mqtt_options.set_last_will(lwt);

    Ok(mqtt_options)
}
