//! Transport layer for the broker session
//!
//! [`BrokerClient`] is the seam between the session logic and the wire
//! client. The session only ever talks to the broker through it, so tests
//! can swap the rumqttc client for a recording mock.

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient};

pub mod mqtt;

pub use mqtt::SessionError;

/// Outbound operations of a broker connection
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Enqueue a publish
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), SessionError>;

    /// Enqueue a subscription
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError>;

    /// Enqueue an unsubscription
    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError>;

    /// Send a clean DISCONNECT
    async fn disconnect(&self) -> Result<(), SessionError>;
}

#[async_trait]
impl BrokerClient for AsyncClient {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.publish_with_properties(topic, qos, retain, payload, PublishProperties::default())
            .await
            .map_err(|e| SessionError::PublishFailed(Box::new(e)))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError> {
        AsyncClient::subscribe(self, topic, qos)
            .await
            .map_err(|e| SessionError::SubscriptionFailed(Box::new(e)))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        AsyncClient::unsubscribe(self, topic)
            .await
            .map_err(|e| SessionError::UnsubscribeFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        AsyncClient::disconnect(self)
            .await
            .map_err(|e| SessionError::ConnectionFailed(Box::new(e)))
    }
}
