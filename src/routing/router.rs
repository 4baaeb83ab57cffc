//! Inbound event router
//!
//! Receives one broker message at a time from the session event loop,
//! copies its payload into a bounded buffer, counts it and dispatches
//! sensor readings to the control engine by exact topic match.
//!
//! Dispatch never waits: readings go through [`ControlHandle::try_submit`],
//! so a busy control task can never stall the session event loop.
//!
//! # Example
//!
//! ```rust
//! use gateway_node::control::{ActuatorControlEngine, IlluminationRule, MemoryOutput, ThermalRule};
//! use gateway_node::observability::StatisticsRegistry;
//! use gateway_node::protocol::TopicSet;
//! use gateway_node::routing::{EventRouter, RouteOutcome};
//! use std::sync::Arc;
//!
//! tokio_test::block_on(async {
//!     let engine = ActuatorControlEngine::new(
//!         IlluminationRule::default(),
//!         ThermalRule::default(),
//!         Arc::new(MemoryOutput::new("lights")),
//!         Arc::new(MemoryOutput::new("climate")),
//!     );
//!     let (control, _task) = engine.spawn(8);
//!     let router = EventRouter::new(
//!         control,
//!         Arc::new(StatisticsRegistry::new()),
//!         TopicSet::new("demo/central"),
//!         512,
//!     );
//!
//!     let outcome = router.route("casa/externo/luminosidade", b"2");
//!     assert!(matches!(outcome, RouteOutcome::Dispatched { value: 2, .. }));
//! });
//! ```

use crate::control::{ControlHandle, Sensor};
use crate::observability::{StatEvent, StatisticsRegistry};
use crate::protocol::topics::{topic_matches, TopicSet, ILLUMINATION_TOPIC, TEMPERATURE_TOPIC};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A message as delivered by the session, payload already bounded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReading {
    pub topic: String,
    pub raw_value: String,
    /// Payload exceeded the buffer and was cut
    pub truncated: bool,
}

impl InboundReading {
    /// Copy at most `max_bytes` of `payload`
    pub fn capture(topic: &str, payload: &[u8], max_bytes: usize) -> Self {
        let truncated = payload.len() > max_bytes;
        let bounded = &payload[..payload.len().min(max_bytes)];
        Self {
            topic: topic.to_string(),
            raw_value: String::from_utf8_lossy(bounded).into_owned(),
            truncated,
        }
    }

    /// Integer value of the payload, 0 when it has no leading digits
    pub fn value(&self) -> i32 {
        parse_reading(&self.raw_value).unwrap_or(0)
    }
}

/// Best-effort integer parse: optional whitespace and sign, then leading
/// digits. Trailing garbage is ignored; out-of-range values saturate.
/// Returns `None` when no digit was found.
pub fn parse_reading(raw: &str) -> Option<i32> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    let mut seen = false;
    for byte in digits.bytes() {
        if !byte.is_ascii_digit() {
            break;
        }
        seen = true;
        value = (value * 10 + i64::from(byte - b'0')).min(i64::from(i32::MAX) + 1);
    }

    if !seen {
        return None;
    }
    let signed = if negative { -value } else { value };
    Some(signed.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Reading queued for the control engine
    Dispatched { sensor: Sensor, value: i32 },
    /// Reading parsed but the control queue refused it
    QueueRejected { sensor: Sensor, value: i32 },
    /// Delivered on the command topic; logged only
    Command,
    /// Delivered under the config filter; logged only
    Config,
    /// No handler for this topic
    Ignored,
}

pub struct EventRouter {
    control: ControlHandle,
    statistics: Arc<StatisticsRegistry>,
    topics: TopicSet,
    max_payload_bytes: usize,
}

impl EventRouter {
    pub fn new(
        control: ControlHandle,
        statistics: Arc<StatisticsRegistry>,
        topics: TopicSet,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            control,
            statistics,
            topics,
            max_payload_bytes,
        }
    }

    /// Handle one inbound message
    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        let reading = InboundReading::capture(topic, payload, self.max_payload_bytes);
        if reading.truncated {
            warn!(
                topic = %topic,
                len = payload.len(),
                max = self.max_payload_bytes,
                "Inbound payload truncated"
            );
        }
        self.statistics.record(StatEvent::Received);

        let sensor = match topic {
            ILLUMINATION_TOPIC => Sensor::Illumination,
            TEMPERATURE_TOPIC => Sensor::Temperature,
            _ => return self.classify_unrouted(&reading),
        };

        let value = match parse_reading(&reading.raw_value) {
            Some(value) => value,
            None => {
                warn!(topic = %topic, payload = %reading.raw_value, "Non-numeric reading, using 0");
                0
            }
        };
        debug!(topic = %topic, value, "Sensor reading received");

        if self.control.try_submit(sensor, value) {
            RouteOutcome::Dispatched { sensor, value }
        } else {
            RouteOutcome::QueueRejected { sensor, value }
        }
    }

    fn classify_unrouted(&self, reading: &InboundReading) -> RouteOutcome {
        if reading.topic == self.topics.commands {
            info!(payload = %reading.raw_value, "Command received");
            RouteOutcome::Command
        } else if topic_matches(&self.topics.config_filter, &reading.topic) {
            info!(topic = %reading.topic, payload = %reading.raw_value, "Configuration update received");
            RouteOutcome::Config
        } else {
            debug!(topic = %reading.topic, "No route for topic, dropping");
            RouteOutcome::Ignored
        }
    }
}
