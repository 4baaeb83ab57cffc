//! Mock implementations for testing
//!
//! Provides a mock broker client, link driver, system probe and output line
//! so the engine can be exercised without a broker, radio or GPIO.

use crate::control::OutputLine;
use crate::link::driver::emit;
use crate::link::{LinkDriver, LinkError, LinkEvent};
use crate::observability::SystemProbe;
use crate::transport::{BrokerClient, SessionError};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One publish recorded by [`MockBrokerClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock broker client for testing
#[derive(Debug, Default)]
pub struct MockBrokerClient {
    pub published: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    pub unsubscriptions: Arc<Mutex<Vec<String>>>,
    pub disconnected: Arc<AtomicBool>,
    pub should_fail: bool,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails as if the request queue were gone
    pub fn with_failure(self) -> Self {
        Self {
            should_fail: true,
            ..self
        }
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().await.clone()
    }

    pub async fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
        self.subscriptions.lock().await.clear();
        self.unsubscriptions.lock().await.clear();
    }

    fn failure() -> Box<dyn std::error::Error + Send + Sync> {
        "mock broker failure".into()
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), SessionError> {
        if self.should_fail {
            return Err(SessionError::PublishFailed(Self::failure()));
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError> {
        if self.should_fail {
            return Err(SessionError::SubscriptionFailed(Self::failure()));
        }
        self.subscriptions.lock().await.push((topic.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        if self.should_fail {
            return Err(SessionError::UnsubscribeFailed(Self::failure()));
        }
        self.unsubscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.disconnected.store(true, Ordering::SeqCst);
        if self.should_fail {
            return Err(SessionError::ConnectionFailed(Self::failure()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssociationOutcome {
    Associate,
    Silent,
    Fail,
}

/// Scripted link driver
#[derive(Debug)]
pub struct MockLinkDriver {
    outcome: AssociationOutcome,
    address: IpAddr,
    signal: Option<i32>,
    requests: AtomicU32,
    events: std::sync::Mutex<Option<mpsc::Sender<LinkEvent>>>,
}

impl MockLinkDriver {
    fn with_outcome(outcome: AssociationOutcome) -> Self {
        Self {
            outcome,
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
            signal: None,
            requests: AtomicU32::new(0),
            events: std::sync::Mutex::new(None),
        }
    }

    /// Every association request succeeds and yields an address
    pub fn associating() -> Self {
        Self::with_outcome(AssociationOutcome::Associate)
    }

    /// Association requests are counted but never answered
    pub fn silent() -> Self {
        Self::with_outcome(AssociationOutcome::Silent)
    }

    /// Every association request reports a lost link
    pub fn failing() -> Self {
        Self::with_outcome(AssociationOutcome::Fail)
    }

    pub fn with_signal(mut self, dbm: i32) -> Self {
        self.signal = Some(dbm);
        self
    }

    pub fn association_requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Push an arbitrary event as if the network stack reported it
    pub fn inject(&self, event: LinkEvent) -> bool {
        match self.events.lock().ok().and_then(|guard| guard.clone()) {
            Some(events) => {
                emit(&events, event);
                true
            }
            None => false,
        }
    }
}

impl LinkDriver for MockLinkDriver {
    fn start(&self, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError> {
        emit(&events, LinkEvent::Started);
        if let Ok(mut guard) = self.events.lock() {
            *guard = Some(events);
        }
        Ok(())
    }

    fn request_association(&self) -> Result<(), LinkError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            AssociationOutcome::Associate => {
                self.inject(LinkEvent::Associated);
                self.inject(LinkEvent::AddressAcquired(self.address));
            }
            AssociationOutcome::Fail => {
                self.inject(LinkEvent::Lost {
                    reason: "mock association failure".to_string(),
                });
            }
            AssociationOutcome::Silent => {}
        }
        Ok(())
    }

    fn signal_strength(&self) -> Option<i32> {
        self.signal
    }
}

/// System probe with fixed figures
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    pub free: Option<u64>,
    pub min_free: Option<u64>,
    pub reset_reason: u32,
}

impl FixedProbe {
    pub fn new(free: u64, min_free: u64) -> Self {
        Self {
            free: Some(free),
            min_free: Some(min_free),
            reset_reason: crate::observability::health::RESET_REASON_POWER_ON,
        }
    }

    /// A platform that cannot report memory
    pub fn unavailable() -> Self {
        Self {
            free: None,
            min_free: None,
            reset_reason: crate::observability::health::RESET_REASON_POWER_ON,
        }
    }
}

impl SystemProbe for FixedProbe {
    fn free_memory(&self) -> Option<u64> {
        self.free
    }

    fn min_free_memory(&self) -> Option<u64> {
        self.min_free
    }

    fn reset_reason(&self) -> u32 {
        self.reset_reason
    }
}

/// Output line remembering every level written to it
#[derive(Debug)]
pub struct RecordingOutput {
    name: String,
    level: AtomicBool,
    history: std::sync::Mutex<Vec<bool>>,
}

impl RecordingOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: AtomicBool::new(false),
            history: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Levels written so far, oldest first
    pub fn history(&self) -> Vec<bool> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Levels written so far with consecutive repeats collapsed
    pub fn transitions(&self) -> Vec<bool> {
        let mut levels = self.history();
        levels.dedup();
        levels
    }
}

impl OutputLine for RecordingOutput {
    fn set_level(&self, on: bool) {
        self.level.store(on, Ordering::SeqCst);
        if let Ok(mut history) = self.history.lock() {
            history.push(on);
        }
    }

    fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
