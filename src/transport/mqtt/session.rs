//! Broker session: the impure half of the MQTT transport
//!
//! Owns the rumqttc client and event loop task. The event loop is the
//! session's callback context: it flips [`SessionState`], keeps the
//! statistics, re-subscribes on every ConnAck and hands inbound messages to
//! the [`EventRouter`]. After a loss it waits for the link to be attached
//! again and retries with the [`ReconnectConfig`] backoff.

use super::connection::{configure_mqtt_options, ReconnectConfig, SessionError, SessionState};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::link::LinkState;
use crate::observability::{StatEvent, StatisticsRegistry};
use crate::protocol::messages::{encode, BootInfo};
use crate::protocol::topics::{validate_publish_topic, TopicSet, STATUS_OFFLINE, STATUS_ONLINE};
use crate::routing::EventRouter;
use crate::transport::BrokerClient;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Time given to the offline status to leave before disconnecting
const OFFLINE_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// How long `disconnect` waits for the event loop task to finish
const EVENT_LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of rumqttc's request queue
const REQUEST_QUEUE_CAPACITY: usize = 10;

/// What the event loop should do after a routed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEffect {
    Continue,
    Established,
    SessionLost,
    /// Our own DISCONNECT went out; the loop should end
    Closed,
}

pub struct BrokerSession {
    device_id: String,
    config: MqttSection,
    topics: TopicSet,
    statistics: Arc<StatisticsRegistry>,
    reconnect_config: ReconnectConfig,
    client: RwLock<Option<Arc<dyn BrokerClient>>>,
    router: RwLock<Option<Arc<EventRouter>>>,
    state_tx: watch::Sender<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    offline_since: Mutex<Option<Instant>>,
    next_message_id: AtomicU16,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerSession {
    pub fn new(
        device_id: &str,
        config: MqttSection,
        topics: TopicSet,
        statistics: Arc<StatisticsRegistry>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            device_id: device_id.to_string(),
            config,
            topics,
            statistics,
            reconnect_config: ReconnectConfig::default(),
            client: RwLock::new(None),
            router: RwLock::new(None),
            state_tx,
            shutdown_tx,
            offline_since: Mutex::new(None),
            next_message_id: AtomicU16::new(1),
            event_loop_handle: Mutex::new(None),
        })
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(self.state())
    }

    /// Route inbound messages to `router`
    pub fn set_router(&self, router: Arc<EventRouter>) {
        if let Ok(mut guard) = self.router.write() {
            *guard = Some(router);
        }
    }

    /// Install the client used for outbound operations
    pub fn attach_client(&self, client: Arc<dyn BrokerClient>) {
        if let Ok(mut guard) = self.client.write() {
            *guard = Some(client);
        }
    }

    fn client(&self) -> Option<Arc<dyn BrokerClient>> {
        self.client.read().ok().and_then(|guard| guard.clone())
    }

    /// Create the broker client, start the event loop and wait for the
    /// first ConnAck. On timeout the event loop keeps trying in the
    /// background.
    pub async fn connect(
        self: &Arc<Self>,
        link_rx: watch::Receiver<LinkState>,
    ) -> Result<(), SessionError> {
        if self.client().is_some() {
            return Err(SessionError::AlreadyStarted);
        }

        let options = configure_mqtt_options(&self.device_id, &self.config, &self.topics.status)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        self.attach_client(Arc::new(client));

        let state_rx = self.subscribe_state();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let span = crate::mqtt_span!(broker = %self.config.broker_url);
        let handle = tokio::spawn(
            Self::run_event_loop(
                Arc::downgrade(self),
                self.reconnect_config.clone(),
                event_loop,
                link_rx,
                shutdown_rx,
            )
            .instrument(span),
        );
        if let Ok(mut guard) = self.event_loop_handle.lock() {
            *guard = Some(handle);
        }

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        Self::wait_for_connection_confirmation(state_rx, timeout).await
    }

    /// Wait for the session to report Connected, bounded by `timeout`
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<SessionState>,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if *state_rx.borrow_and_update() == SessionState::Connected {
                    return true;
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;

        match waited {
            Ok(true) => Ok(()),
            Ok(false) => Err(SessionError::NoSession),
            Err(_) => Err(SessionError::ConnectTimeout { waited: timeout }),
        }
    }

    /// Drive rumqttc's event loop. The task only holds a weak reference so
    /// dropping the last session handle stops it.
    async fn run_event_loop(
        session: Weak<Self>,
        reconnect_config: ReconnectConfig,
        mut event_loop: EventLoop,
        mut link_rx: watch::Receiver<LinkState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Starting broker event loop");
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let Some(session) = session.upgrade() else {
                        debug!("Session dropped, stopping event loop");
                        break;
                    };
                    let effect = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            session.handle_route(route).await
                        }
                        Err(e) => {
                            session.mark_lost(ConnectionEvent::NetworkError(e.to_string()));
                            RouteEffect::SessionLost
                        }
                    };
                    // Never park in the reconnect wait holding a strong handle
                    drop(session);

                    match effect {
                        RouteEffect::Established => reconnect_attempts = 0,
                        RouteEffect::Continue => {}
                        RouteEffect::Closed => break,
                        RouteEffect::SessionLost => {
                            if !Self::await_reconnect(
                                &reconnect_config,
                                &mut reconnect_attempts,
                                &mut link_rx,
                                shutdown_rx.clone(),
                            )
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("Broker event loop stopped");
    }

    /// Apply one routed event; this is the session's callback context
    pub async fn handle_route(&self, route: EventRoute) -> RouteEffect {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.mark_established();
                self.subscribe_domain_topics().await;
                RouteEffect::Established
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(topic = %topic, len = payload.len(), retain, "Message received");
                let router = self.router.read().ok().and_then(|guard| guard.clone());
                match router {
                    Some(router) => {
                        router.route(&topic, &payload);
                    }
                    None => warn!(topic = %topic, "No router installed, message dropped"),
                }
                RouteEffect::Continue
            }
            EventRoute::Disconnected => {
                self.mark_lost(ConnectionEvent::DisconnectedByBroker);
                RouteEffect::SessionLost
            }
            EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                debug!(packet_id, filters, "Subscription confirmed");
                RouteEffect::Continue
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                RouteEffect::Continue
            }
            EventRoute::DisconnectSent => {
                HealthMonitor::log_state_transition(self.state(), &ConnectionEvent::Stopped);
                self.state_tx.send_replace(SessionState::Disconnected);
                RouteEffect::Closed
            }
            EventRoute::OutgoingEvent => RouteEffect::Continue,
        }
    }

    fn mark_established(&self) {
        let event = ConnectionEvent::ConnAckReceived;
        HealthMonitor::log_state_transition(self.state(), &event);
        self.state_tx
            .send_replace(HealthMonitor::determine_next_state(&event));

        let offline_since = self.offline_since.lock().ok().and_then(|mut guard| guard.take());
        if let Some(since) = offline_since {
            let millis = since.elapsed().as_millis() as u64;
            self.statistics.record(StatEvent::OfflineTime { millis });
            info!(offline_ms = millis, "Broker session restored");
        }
    }

    /// Flip to Disconnected; counts a disconnect only if we were connected
    fn mark_lost(&self, event: ConnectionEvent) {
        let previous = self.state();
        HealthMonitor::log_state_transition(previous, &event);
        self.state_tx
            .send_replace(HealthMonitor::determine_next_state(&event));

        if previous == SessionState::Connected {
            self.statistics.record(StatEvent::Disconnected);
            if let Ok(mut guard) = self.offline_since.lock() {
                *guard = Some(Instant::now());
            }
        }
    }

    /// Wait for the link, then back off; false means stop the event loop
    async fn await_reconnect(
        reconnect_config: &ReconnectConfig,
        attempts: &mut u32,
        link_rx: &mut watch::Receiver<LinkState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        if !Self::wait_for_link(link_rx, shutdown_rx.clone()).await {
            return false;
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            *attempts,
            reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *attempts = attempt;
                info!("Attempting broker reconnection {} after {}ms delay", attempt, delay_ms);
                Self::interruptible_sleep(shutdown_rx, delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                error!("Broker reconnection attempts exhausted");
                false
            }
        }
    }

    /// Block until the link is attached; false if shutdown arrives first
    async fn wait_for_link(
        link_rx: &mut watch::Receiver<LinkState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        loop {
            let link = *link_rx.borrow_and_update();
            if HealthMonitor::link_allows_reconnect(link) {
                return true;
            }
            debug!(link = ?link, "Waiting for link before reconnecting");

            tokio::select! {
                changed = link_rx.changed() => {
                    if changed.is_err() {
                        warn!("Link state channel closed, stopping reconnection");
                        return false;
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                true
            }
        }
    }

    async fn subscribe_domain_topics(&self) {
        for (topic, level) in self.topics.domain_subscriptions() {
            let qos = if level == 0 {
                QoS::AtMostOnce
            } else {
                QoS::AtLeastOnce
            };
            match self.subscribe(&topic, qos).await {
                Ok(msg_id) => debug!(topic = %topic, msg_id, "Subscribed"),
                Err(e) => error!(topic = %topic, "Subscription failed: {}", e),
            }
        }
    }

    /// Self-allocated packet id: 0 for QoS 0, never 0 otherwise
    fn allocate_message_id(&self, qos: QoS) -> u16 {
        if qos == QoS::AtMostOnce {
            return 0;
        }
        loop {
            let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Fail fast without touching the network when there is no usable
    /// session, counting the failure
    fn ready_client(&self) -> Result<Arc<dyn BrokerClient>, SessionError> {
        let Some(client) = self.client() else {
            self.statistics.record(StatEvent::PublishFailure);
            return Err(SessionError::NoSession);
        };
        if !self.is_connected() {
            self.statistics.record(StatEvent::PublishFailure);
            return Err(SessionError::NotConnected);
        }
        Ok(client)
    }

    /// Publish `payload`; returns the message id
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<u16, SessionError> {
        let client = self.ready_client()?;
        if let Err(e) = validate_publish_topic(topic) {
            self.statistics.record(StatEvent::PublishFailure);
            return Err(e.into());
        }

        match client.publish(topic, qos, retain, payload.to_vec()).await {
            Ok(()) => {
                self.statistics.record(StatEvent::Published);
                let msg_id = self.allocate_message_id(qos);
                debug!(topic = %topic, msg_id, len = payload.len(), "Published");
                Ok(msg_id)
            }
            Err(e) => {
                self.statistics.record(StatEvent::PublishFailure);
                warn!(topic = %topic, "Publish failed: {}", e);
                Err(e)
            }
        }
    }

    /// Publish the first `len` bytes of `payload`; 0 means all of it
    pub async fn publish_with_len(
        &self,
        topic: &str,
        payload: &[u8],
        len: usize,
        qos: QoS,
        retain: bool,
    ) -> Result<u16, SessionError> {
        let end = if len == 0 {
            payload.len()
        } else {
            len.min(payload.len())
        };
        self.publish(topic, &payload[..end], qos, retain).await
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<u16, SessionError> {
        let client = self.ready_client()?;
        match client.subscribe(topic, qos).await {
            Ok(()) => Ok(self.allocate_message_id(QoS::AtLeastOnce)),
            Err(e) => {
                self.statistics.record(StatEvent::PublishFailure);
                Err(e)
            }
        }
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<u16, SessionError> {
        let client = self.ready_client()?;
        client.unsubscribe(topic).await?;
        Ok(self.allocate_message_id(QoS::AtLeastOnce))
    }

    /// Retained QoS 1 `online` / `offline` on the status topic
    pub async fn publish_status(&self, online: bool) -> Result<u16, SessionError> {
        let payload = if online { STATUS_ONLINE } else { STATUS_OFFLINE };
        info!(status = payload, topic = %self.topics.status, "Publishing status");
        self.publish(&self.topics.status, payload.as_bytes(), QoS::AtLeastOnce, true)
            .await
    }

    pub async fn publish_boot(&self, boot: &BootInfo) -> Result<u16, SessionError> {
        let payload = encode(boot)?;
        self.publish(&self.topics.boot, payload.as_bytes(), QoS::AtLeastOnce, false)
            .await
    }

    /// Graceful stop: announce offline, send DISCONNECT, stop the event loop.
    ///
    /// The DISCONNECT is queued while the event loop still runs so it reaches
    /// the broker and the last will is discarded. The loop ends by itself
    /// once the packet is written; the shutdown signal only covers a loop
    /// that never had a session or did not drain in time.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let was_connected = self.is_connected();
        // Without a session there is nothing to close
        let result = match self.client() {
            Some(client) if was_connected => {
                if let Err(e) = self.publish_status(false).await {
                    warn!("Failed to publish offline status: {}", e);
                }
                tokio::time::sleep(OFFLINE_FLUSH_DELAY).await;
                client.disconnect().await
            }
            _ => Ok(()),
        };

        let handle = self
            .event_loop_handle
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(mut handle) = handle {
            let drained = was_connected
                && result.is_ok()
                && tokio::time::timeout(EVENT_LOOP_JOIN_TIMEOUT, &mut handle)
                    .await
                    .is_ok();

            if drained {
                info!("Event loop drained after DISCONNECT");
            } else {
                let _ = self.shutdown_tx.send(true);
                match tokio::time::timeout(EVENT_LOOP_JOIN_TIMEOUT, &mut handle).await {
                    Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                    Ok(Err(e)) if !e.is_cancelled() => {
                        warn!("Event loop task ended with error: {}", e)
                    }
                    Err(_) => {
                        warn!("Event loop task didn't shut down gracefully");
                        handle.abort();
                    }
                    _ => {}
                }
            }
        }
        let _ = self.shutdown_tx.send(true);

        HealthMonitor::log_state_transition(self.state(), &ConnectionEvent::Stopped);
        self.state_tx.send_replace(SessionState::Disconnected);

        info!("Broker session closed");
        result
    }

    /// Signal and abort the event loop without a DISCONNECT; the broker
    /// sees an unclean close and publishes the last will
    pub fn stop_event_loop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut guard) = self.event_loop_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for BrokerSession {
    fn drop(&mut self) {
        self.stop_event_loop();
    }
}
