//! MQTT broker session
//!
//! Pure functions are kept apart from I/O so most of the session logic is
//! testable without a broker.
//!
//! - [`connection`] - session state, errors, rumqttc options and last will
//! - [`message_handler`] - pure routing of rumqttc events
//! - [`health_monitor`] - pure reconnection decisions
//! - [`session`] - the impure session and its event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use gateway_node::config::GatewayConfig;
//! use gateway_node::link::{HostLinkDriver, NetworkLinkManager};
//! use gateway_node::observability::StatisticsRegistry;
//! use gateway_node::protocol::TopicSet;
//! use gateway_node::transport::mqtt::BrokerSession;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = GatewayConfig::with_broker("mqtt://localhost:1883");
//! let link = NetworkLinkManager::new(Arc::new(HostLinkDriver::new()), 5);
//! link.attach(Duration::from_secs(30)).await?;
//!
//! let session = BrokerSession::new(
//!     &config.device.id,
//!     config.mqtt.clone(),
//!     TopicSet::new(&config.mqtt.topic_root),
//!     Arc::new(StatisticsRegistry::new()),
//! );
//! session.connect(link.subscribe()).await?;
//! session.publish_status(true).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod session;

pub use connection::{
    configure_mqtt_options, qos_from_level, ReconnectConfig, SessionError, SessionState,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::{BrokerSession, RouteEffect};
