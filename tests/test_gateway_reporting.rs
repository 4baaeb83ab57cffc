//! Reporting tasks and orchestrator startup
//!
//! Reporting runs against a mock broker client; orchestrator startup is
//! checked against an unreachable broker to exercise the degraded path.

use gateway_node::config::GatewayConfig;
use gateway_node::control::{ActuatorControlEngine, Sensor};
use gateway_node::gateway::{Orchestrator, ReportingContext, StartupMode};
use gateway_node::link::NetworkLinkManager;
use gateway_node::observability::StatisticsRegistry;
use gateway_node::protocol::{AlertKind, TopicSet};
use gateway_node::testing::{FixedProbe, MockBrokerClient, MockLinkDriver, RecordingOutput};
use gateway_node::transport::mqtt::{BrokerSession, EventRoute};
use gateway_node::GatewayError;
use rumqttc::v5::mqttbytes::QoS;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Rig {
    ctx: ReportingContext,
    client: Arc<MockBrokerClient>,
}

async fn rig(probe: FixedProbe, signal: i32) -> Rig {
    let config = GatewayConfig::with_broker("mqtt://127.0.0.1:1883");
    let statistics = Arc::new(StatisticsRegistry::new());
    let session = BrokerSession::new(
        &config.device.id,
        config.mqtt.clone(),
        TopicSet::new(&config.mqtt.topic_root),
        statistics.clone(),
    );
    let client = Arc::new(MockBrokerClient::new());
    session.attach_client(client.clone());

    let link = NetworkLinkManager::new(
        Arc::new(MockLinkDriver::associating().with_signal(signal)),
        config.link.max_retries,
    );
    link.attach(Duration::from_secs(1)).await.unwrap();

    let engine = ActuatorControlEngine::from_config(
        &config.control,
        Arc::new(RecordingOutput::new("lights")),
        Arc::new(RecordingOutput::new("climate")),
    );
    let (control, _task) = engine.spawn(8);

    let ctx = ReportingContext::new(
        session,
        statistics,
        control,
        link,
        Arc::new(probe),
        Instant::now(),
        config.reporting.clone(),
    );
    Rig { ctx, client }
}

async fn connect(rig: &Rig) {
    rig.ctx
        .session
        .handle_route(EventRoute::ConnectionAcknowledged)
        .await;
    rig.client.clear_history().await;
}

fn json(payload: &[u8]) -> Value {
    serde_json::from_slice(payload).unwrap()
}

#[tokio::test]
async fn test_telemetry_reflects_control_state() {
    let rig = rig(FixedProbe::new(100_000, 90_000), -55).await;
    connect(&rig).await;
    rig.ctx.control.submit(Sensor::Illumination, 1).await;
    rig.ctx.control.submit(Sensor::Temperature, 27).await;

    rig.ctx.publish_telemetry().await.unwrap();
    rig.ctx.publish_telemetry().await.unwrap();

    let published = rig.client.published_on("demo/central/telemetria").await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    let doc = json(&published[1].payload);
    assert_eq!(doc["luminosidade"], 1);
    assert_eq!(doc["temperatura"], 27);
    assert_eq!(doc["luzes"], true);
    assert_eq!(doc["ar_condicionado"], true);
    assert_eq!(doc["contador"], 2);
}

#[tokio::test]
async fn test_health_report_shape() {
    let rig = rig(FixedProbe::new(100_000, 90_000), -55).await;
    connect(&rig).await;

    rig.ctx.publish_health().await.unwrap();

    let published = rig.client.published_on("demo/central/health").await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].qos, QoS::AtMostOnce);
    let doc = json(&published[0].payload);
    assert_eq!(doc["free_heap"], 100_000);
    assert_eq!(doc["min_free_heap"], 90_000);
    assert_eq!(doc["wifi_rssi"], -55);
    assert_eq!(doc["mqtt_connected"], 1);
    assert_eq!(doc["mqtt_failures"], 0);
}

#[tokio::test]
async fn test_monitor_publishes_alerts_when_resources_low() {
    let rig = rig(FixedProbe::new(20_000, 15_000), -90).await;
    connect(&rig).await;

    let alerts = rig.ctx.run_monitor().await;

    let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AlertKind::LowMemory, AlertKind::WeakSignal]);
    let published = rig.client.published_on("demo/central/alertas").await;
    assert_eq!(published.len(), 2);
    assert_eq!(json(&published[0].payload)["kind"], "low_memory");
    assert_eq!(json(&published[1].payload)["threshold"], -80);
}

#[tokio::test]
async fn test_monitor_stays_quiet_while_disconnected() {
    let rig = rig(FixedProbe::new(20_000, 15_000), -90).await;

    let alerts = rig.ctx.run_monitor().await;

    assert!(alerts.is_empty());
    assert!(rig.client.published().await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_counts_its_own_publishes() {
    let rig = rig(FixedProbe::unavailable(), -55).await;
    connect(&rig).await;
    rig.ctx.publish_health().await.unwrap();
    rig.ctx.publish_telemetry().await.unwrap();

    rig.ctx.publish_heartbeat().await.unwrap();
    rig.ctx.statistics.reset();
    rig.ctx.publish_heartbeat().await.unwrap();

    let published = rig.client.published_on("demo/central/custom").await;
    let counts: Vec<Value> = published
        .iter()
        .map(|p| json(&p.payload)["publish_count"].clone())
        .collect();
    assert_eq!(counts, vec![Value::from(1), Value::from(2)]);
    assert_eq!(json(&published[0].payload)["status"], "operational");
}

#[tokio::test]
async fn test_dropping_started_gateway_releases_session_and_link() {
    let mut config = GatewayConfig::with_broker("mqtt://127.0.0.1:1");
    config.mqtt.connect_timeout_secs = 1;
    let mut gateway = Orchestrator::new(
        config,
        Arc::new(MockLinkDriver::associating()),
        Arc::new(FixedProbe::new(100_000, 90_000)),
        Arc::new(RecordingOutput::new("lights")),
        Arc::new(RecordingOutput::new("climate")),
    );
    assert_eq!(gateway.start().await.unwrap(), StartupMode::Degraded);
    let session = Arc::downgrade(gateway.session());
    let link = Arc::downgrade(gateway.link());

    drop(gateway);

    // Aborted tasks release their handles once the runtime reaps them
    for _ in 0..100 {
        if session.upgrade().is_none() && link.upgrade().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(session.upgrade().is_none(), "session outlived the gateway");
    assert!(link.upgrade().is_none(), "link manager outlived the gateway");
}

#[tokio::test]
async fn test_startup_degrades_when_broker_unreachable() {
    let mut config = GatewayConfig::with_broker("mqtt://127.0.0.1:1");
    config.mqtt.connect_timeout_secs = 1;
    let lights = Arc::new(RecordingOutput::new("lights"));
    let mut gateway = Orchestrator::new(
        config,
        Arc::new(MockLinkDriver::associating()),
        Arc::new(FixedProbe::new(100_000, 90_000)),
        lights.clone(),
        Arc::new(RecordingOutput::new("climate")),
    );

    let mode = gateway.start().await.unwrap();

    assert_eq!(mode, StartupMode::Degraded);
    assert!(!gateway.is_connected());
    assert!(gateway.link().is_attached());

    // Control keeps working while disconnected
    let control = gateway.control().cloned().unwrap();
    control.submit(Sensor::Illumination, 0).await;
    let snapshot = gateway.control_snapshot().await.unwrap();
    assert!(snapshot.lights_on());

    let err = gateway
        .publish("demo/central/custom", b"x", 0, 1, false)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::PublishFailure { .. }));

    let second = gateway.start().await.unwrap_err();
    assert!(matches!(second, GatewayError::TaskSpawn { .. }));
    assert!(second.is_fatal());

    gateway.shutdown().await.unwrap();
    assert!(gateway.control_snapshot().await.is_none());
    assert_eq!(lights.transitions(), vec![false, true]);
}
