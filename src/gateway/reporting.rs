//! Periodic reporting tasks
//!
//! Telemetry, health, system monitor and heartbeat. Each task only reads
//! engine state through its public surface and publishes through the
//! session; none of them holds state the engine depends on. Every task
//! skips its publish while the session is down.

use crate::config::ReportingSection;
use crate::control::ControlHandle;
use crate::link::NetworkLinkManager;
use crate::observability::{HealthSnapshot, StatisticsRegistry, SystemProbe};
use crate::protocol::messages::{encode, Alert, AlertKind, HeartbeatReport, TelemetryReport};
use crate::transport::mqtt::{BrokerSession, SessionError};
use rumqttc::v5::mqttbytes::QoS;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Health view built from the engine's collaborators
pub fn capture_health(
    probe: &dyn SystemProbe,
    link: &NetworkLinkManager,
    session: &BrokerSession,
    started: Instant,
) -> HealthSnapshot {
    HealthSnapshot::capture(
        probe,
        link.signal_strength(),
        started.elapsed(),
        session.is_connected(),
    )
}

/// Alerts raised by a health snapshot (pure function)
pub fn evaluate_alerts(health: &HealthSnapshot, settings: &ReportingSection) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if let Some(free) = health.free_memory {
        if free < settings.low_memory_bytes {
            alerts.push(Alert {
                kind: AlertKind::LowMemory,
                value: free as i64,
                threshold: settings.low_memory_bytes as i64,
            });
        }
    }

    if let Some(rssi) = health.signal_strength {
        if rssi < settings.weak_signal_dbm {
            alerts.push(Alert {
                kind: AlertKind::WeakSignal,
                value: i64::from(rssi),
                threshold: i64::from(settings.weak_signal_dbm),
            });
        }
    }

    alerts
}

/// Everything the reporting tasks read
#[derive(Clone)]
pub struct ReportingContext {
    pub session: Arc<BrokerSession>,
    pub statistics: Arc<StatisticsRegistry>,
    pub control: ControlHandle,
    pub link: Arc<NetworkLinkManager>,
    pub probe: Arc<dyn SystemProbe>,
    pub started: Instant,
    pub settings: ReportingSection,
    telemetry_counter: Arc<AtomicU64>,
    heartbeat_counter: Arc<AtomicU64>,
}

impl ReportingContext {
    pub fn new(
        session: Arc<BrokerSession>,
        statistics: Arc<StatisticsRegistry>,
        control: ControlHandle,
        link: Arc<NetworkLinkManager>,
        probe: Arc<dyn SystemProbe>,
        started: Instant,
        settings: ReportingSection,
    ) -> Self {
        Self {
            session,
            statistics,
            control,
            link,
            probe,
            started,
            settings,
            telemetry_counter: Arc::new(AtomicU64::new(0)),
            heartbeat_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        capture_health(self.probe.as_ref(), &self.link, &self.session, self.started)
    }

    /// Build and publish one telemetry report
    pub async fn publish_telemetry(&self) -> Result<u16, SessionError> {
        let Some(control) = self.control.snapshot().await else {
            warn!("Control engine unavailable, skipping telemetry");
            return Err(SessionError::NoSession);
        };
        let counter = self.telemetry_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let report = TelemetryReport {
            temperatura: control.last_temperature,
            luminosidade: control.last_illumination,
            luzes: control.lights_on(),
            ar_condicionado: control.climate_on(),
            contador: counter,
            timestamp: self.started.elapsed().as_millis() as u64,
        };
        let payload = encode(&report)?;
        let topic = &self.session.topics().telemetry;
        self.session
            .publish(topic, payload.as_bytes(), QoS::AtLeastOnce, false)
            .await
    }

    /// Publish one health report
    pub async fn publish_health(&self) -> Result<u16, SessionError> {
        let health = self.health();
        let report = health.to_report(&self.statistics.snapshot());
        info!(
            free_heap = report.free_heap,
            rssi = report.wifi_rssi,
            uptime_sec = report.uptime_sec,
            "Health report"
        );
        let payload = encode(&report)?;
        let topic = &self.session.topics().health;
        self.session
            .publish(topic, payload.as_bytes(), QoS::AtMostOnce, false)
            .await
    }

    /// One system monitor pass; returns the alerts that were raised
    pub async fn run_monitor(&self) -> Vec<Alert> {
        self.statistics.log_summary();
        let health = self.health();
        info!(
            free_memory = ?health.free_memory,
            min_free_memory = ?health.min_free_memory,
            rssi = health.rssi(),
            link = ?self.link.state(),
            "System status"
        );

        if !self.session.is_connected() {
            warn!("Broker session down, reconnection pending");
            return Vec::new();
        }

        let alerts = evaluate_alerts(&health, &self.settings);
        for alert in &alerts {
            warn!(kind = ?alert.kind, value = alert.value, threshold = alert.threshold, "Resource alert");
            let published = match encode(alert) {
                Ok(payload) => {
                    self.session
                        .publish(
                            &self.session.topics().alerts,
                            payload.as_bytes(),
                            QoS::AtLeastOnce,
                            false,
                        )
                        .await
                }
                Err(e) => Err(e.into()),
            };
            if let Err(e) = published {
                warn!("Failed to publish alert: {}", e);
            }
        }
        alerts
    }

    /// Publish one heartbeat; `publish_count` counts heartbeats only and
    /// survives a statistics reset
    pub async fn publish_heartbeat(&self) -> Result<u16, SessionError> {
        let count = self.heartbeat_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let report = HeartbeatReport::operational(count);
        let payload = encode(&report)?;
        let topic = &self.session.topics().custom;
        self.session
            .publish(topic, payload.as_bytes(), QoS::AtMostOnce, false)
            .await
    }
}

/// Run `work` every `period`, skipping it while the session is down
fn spawn_periodic<F, Fut>(
    name: &'static str,
    ctx: ReportingContext,
    period: Duration,
    work: F,
) -> JoinHandle<()>
where
    F: Fn(ReportingContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<u16, SessionError>> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, interval_secs = period.as_secs(), "Reporting task started");
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // First tick completes immediately, skip it

        loop {
            interval.tick().await;
            if !ctx.session.is_connected() {
                debug!(task = name, "Session down, skipping report");
                continue;
            }
            match work(ctx.clone()).await {
                Ok(msg_id) => debug!(task = name, msg_id, "Report published"),
                Err(e) => warn!(task = name, "Report failed: {}", e),
            }
        }
    })
}

pub fn spawn_telemetry_task(ctx: ReportingContext) -> JoinHandle<()> {
    let period = Duration::from_secs(ctx.settings.telemetry_interval_secs);
    spawn_periodic("telemetry", ctx, period, |ctx| async move {
        ctx.publish_telemetry().await
    })
}

pub fn spawn_health_task(ctx: ReportingContext) -> JoinHandle<()> {
    let period = Duration::from_secs(ctx.settings.health_interval_secs);
    spawn_periodic("health", ctx, period, |ctx| async move {
        ctx.publish_health().await
    })
}

pub fn spawn_heartbeat_task(ctx: ReportingContext) -> JoinHandle<()> {
    let period = Duration::from_secs(ctx.settings.heartbeat_interval_secs);
    spawn_periodic("heartbeat", ctx, period, |ctx| async move {
        ctx.publish_heartbeat().await
    })
}

/// The monitor also runs while disconnected, so it only logs then
pub fn spawn_monitor_task(ctx: ReportingContext) -> JoinHandle<()> {
    let period = Duration::from_secs(ctx.settings.monitor_interval_secs);
    tokio::spawn(async move {
        info!(task = "monitor", interval_secs = period.as_secs(), "Reporting task started");
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // First tick completes immediately, skip it

        loop {
            interval.tick().await;
            ctx.run_monitor().await;
        }
    })
}
