//! Startup sequencing and the engine's public surface
//!
//! Startup runs link attach, control engine, broker session, then the
//! periodic tasks. A link that never attaches aborts startup; a broker that
//! never answers leaves the gateway running disconnected while the session
//! keeps retrying in the background.

use super::reporting::{
    capture_health, spawn_health_task, spawn_heartbeat_task, spawn_monitor_task,
    spawn_telemetry_task, ReportingContext,
};
use crate::config::GatewayConfig;
use crate::control::{ActuatorControlEngine, ControlHandle, ControlSnapshot, MemoryOutput, OutputLine};
use crate::error::{GatewayError, GatewayResult};
use crate::link::{HostLinkDriver, LinkDriver, LinkError, LinkWatchdog, NetworkLinkManager};
use crate::observability::{HealthSnapshot, HostProbe, Statistics, StatisticsRegistry, SystemProbe};
use crate::protocol::messages::BootInfo;
use crate::protocol::topics::TopicSet;
use crate::routing::EventRouter;
use crate::transport::mqtt::{qos_from_level, BrokerSession, SessionError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// How startup ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Session established and status/boot announced
    Connected,
    /// Session not up within its window; running disconnected
    Degraded,
}

pub struct Orchestrator {
    config: GatewayConfig,
    probe: Arc<dyn SystemProbe>,
    statistics: Arc<StatisticsRegistry>,
    link: Arc<NetworkLinkManager>,
    session: Arc<BrokerSession>,
    lights: Arc<dyn OutputLine>,
    climate: Arc<dyn OutputLine>,
    control: Option<ControlHandle>,
    started: Instant,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    mode: Option<StartupMode>,
}

impl Orchestrator {
    /// Create an orchestrator with injected platform collaborators
    pub fn new(
        config: GatewayConfig,
        driver: Arc<dyn LinkDriver>,
        probe: Arc<dyn SystemProbe>,
        lights: Arc<dyn OutputLine>,
        climate: Arc<dyn OutputLine>,
    ) -> Self {
        let statistics = Arc::new(StatisticsRegistry::new());
        let link = NetworkLinkManager::new(driver, config.link.max_retries);
        let session = BrokerSession::new(
            &config.device.id,
            config.mqtt.clone(),
            TopicSet::new(&config.mqtt.topic_root),
            statistics.clone(),
        );

        Self {
            config,
            probe,
            statistics,
            link,
            session,
            lights,
            climate,
            control: None,
            started: Instant::now(),
            tasks: Vec::new(),
            mode: None,
        }
    }

    /// Orchestrator on a hosted target: host network stack, `/proc` memory
    /// figures and in-memory output lines
    pub fn with_host_defaults(config: GatewayConfig) -> Self {
        Self::new(
            config,
            Arc::new(HostLinkDriver::new()),
            Arc::new(HostProbe::new()),
            Arc::new(MemoryOutput::new("lights")),
            Arc::new(MemoryOutput::new("climate")),
        )
    }

    /// Run the startup sequence
    pub async fn start(&mut self) -> GatewayResult<StartupMode> {
        let span = crate::lifecycle_span!(device = %self.config.device.id);
        async {
            if self.mode.is_some() {
                return Err(GatewayError::task_spawn("orchestrator", "already started"));
            }
            tokio::runtime::Handle::try_current()
                .map_err(|e| GatewayError::task_spawn("orchestrator", e))?;

            info!(
                device = %self.config.device.id,
                firmware = %self.config.device.firmware_version,
                "Starting gateway"
            );

            self.attach_link().await?;
            let control = self.start_control();

            let mode = match self.session.connect(self.link.subscribe()).await {
                Ok(()) => StartupMode::Connected,
                Err(SessionError::ConnectTimeout { waited }) => {
                    let degraded = GatewayError::SessionTimeout { waited };
                    warn!("{}; continuing disconnected", degraded);
                    StartupMode::Degraded
                }
                Err(e) => {
                    error!("Broker session failed to start: {}", e);
                    self.abort_tasks();
                    return Err(e.into());
                }
            };

            self.start_supervision(control);

            if self.session.is_connected() {
                if let Err(e) = self.announce_online().await {
                    warn!("Startup announcement failed: {}", e);
                }
            }

            info!(mode = ?mode, tasks = self.tasks.len(), "Gateway started");
            self.mode = Some(mode);
            Ok(mode)
        }
        .instrument(span)
        .await
    }

    async fn attach_link(&self) -> GatewayResult<()> {
        let timeout = Duration::from_secs(self.config.link.attach_timeout_secs);
        match self.link.attach(timeout).await {
            Ok(()) => Ok(()),
            Err(LinkError::Timeout { waited }) => {
                error!(waited_secs = waited.as_secs(), "Link attach timed out");
                Err(GatewayError::LinkTimeout { waited })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Spawn the control engine and its thermal ticker, and route inbound
    /// readings to it before the session can deliver any
    fn start_control(&mut self) -> ControlHandle {
        let settings = &self.config.control;
        let engine =
            ActuatorControlEngine::from_config(settings, self.lights.clone(), self.climate.clone());
        let (control, engine_task) = engine.spawn(settings.event_queue_capacity);
        let ticker = control.spawn_ticker(settings.check_interval());

        let router = EventRouter::new(
            control.clone(),
            self.statistics.clone(),
            self.session.topics().clone(),
            settings.max_payload_bytes,
        );
        self.session.set_router(Arc::new(router));

        self.tasks.push(("control", engine_task));
        self.tasks.push(("thermal-check", ticker));
        self.control = Some(control.clone());
        control
    }

    fn start_supervision(&mut self, control: ControlHandle) {
        let watchdog = LinkWatchdog::new(
            self.link.clone(),
            Duration::from_secs(self.config.link.watchdog_interval_secs),
        );
        self.tasks.push(("link-watchdog", watchdog.spawn()));

        let ctx = ReportingContext::new(
            self.session.clone(),
            self.statistics.clone(),
            control,
            self.link.clone(),
            self.probe.clone(),
            self.started,
            self.config.reporting.clone(),
        );
        self.tasks.push(("telemetry", spawn_telemetry_task(ctx.clone())));
        self.tasks.push(("health", spawn_health_task(ctx.clone())));
        self.tasks.push(("monitor", spawn_monitor_task(ctx.clone())));
        self.tasks.push(("heartbeat", spawn_heartbeat_task(ctx)));
    }

    /// Publish `online` on the status topic and the boot document
    pub async fn announce_online(&self) -> GatewayResult<()> {
        let topics = self.session.topics();
        self.session
            .publish_status(true)
            .await
            .map_err(|e| GatewayError::publish_failure(&topics.status, e))?;

        let device = &self.config.device;
        let boot = BootInfo {
            device: device.id.clone(),
            firmware: device.firmware_version.clone(),
            reset_reason: self.probe.reset_reason(),
            free_heap: self.probe.free_memory().unwrap_or(0),
            idf_version: device.platform_version.clone(),
        };
        self.session
            .publish_boot(&boot)
            .await
            .map_err(|e| GatewayError::publish_failure(&topics.boot, e))?;

        info!(device = %device.id, "Announced online");
        Ok(())
    }

    /// Publish the first `len` bytes of `payload` (0 = all); returns the message id
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        len: usize,
        qos: u8,
        retain: bool,
    ) -> GatewayResult<u16> {
        let qos = qos_from_level(qos).map_err(|e| GatewayError::publish_failure(topic, e))?;
        self.session
            .publish_with_len(topic, payload, len, qos, retain)
            .await
            .map_err(|e| GatewayError::publish_failure(topic, e))
    }

    pub async fn subscribe(&self, topic: &str, qos: u8) -> GatewayResult<u16> {
        let qos = qos_from_level(qos).map_err(|e| GatewayError::subscribe_failure(topic, e))?;
        self.session.subscribe(topic, qos).await.map_err(|e| {
            warn!(topic = %topic, "Subscribe failed: {}", e);
            GatewayError::subscribe_failure(topic, e)
        })
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.statistics.reset();
    }

    pub fn health(&self) -> HealthSnapshot {
        capture_health(self.probe.as_ref(), &self.link, &self.session, self.started)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn mode(&self) -> Option<StartupMode> {
        self.mode
    }

    /// Current actuator state, `None` before start or after shutdown
    pub async fn control_snapshot(&self) -> Option<ControlSnapshot> {
        match &self.control {
            Some(control) => control.snapshot().await,
            None => None,
        }
    }

    /// Sender into the control engine, available after start
    pub fn control(&self) -> Option<&ControlHandle> {
        self.control.as_ref()
    }

    pub fn session(&self) -> &Arc<BrokerSession> {
        &self.session
    }

    pub fn link(&self) -> &Arc<NetworkLinkManager> {
        &self.link
    }

    fn abort_tasks(&mut self) {
        for (name, handle) in self.tasks.drain(..).rev() {
            handle.abort();
            debug!(task = name, "Task aborted");
        }
    }

    /// Stop periodic tasks, close the session with `offline`, stop the link
    pub async fn shutdown(&mut self) -> GatewayResult<()> {
        let span = crate::lifecycle_span!(device = %self.config.device.id);
        async {
            info!("Shutting down gateway");
            self.abort_tasks();
            self.control = None;

            let result = self.session.disconnect().await;
            self.link.shutdown();
            self.statistics.log_summary();
            self.mode = None;

            match result {
                Ok(()) => {
                    info!("Gateway stopped");
                    Ok(())
                }
                Err(e) => {
                    warn!("Session did not close cleanly: {}", e);
                    Err(e.into())
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.abort_tasks();
        self.session.stop_event_loop();
        self.link.shutdown();
    }
}
