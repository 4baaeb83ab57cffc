//! JSON documents published by the gateway
//!
//! Field names are part of the wire contract with existing dashboards, so
//! they are kept exactly as consumers expect them.

use serde::{Deserialize, Serialize};

/// Periodic health document published on `.../health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub free_heap: u64,
    pub min_free_heap: u64,
    pub wifi_rssi: i32,
    pub uptime_sec: u64,
    /// 1 while the broker session is up, 0 otherwise
    pub mqtt_connected: u8,
    pub msgs_sent: u64,
    pub msgs_received: u64,
    pub mqtt_failures: u64,
    pub disconnects: u64,
}

/// One-shot document published on `.../boot` after a connected startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub device: String,
    pub firmware: String,
    pub reset_reason: u32,
    pub free_heap: u64,
    pub idf_version: String,
}

/// Periodic telemetry document published on `.../telemetria`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryReport {
    /// Last temperature reading, if any arrived
    pub temperatura: Option<i32>,
    /// Last illumination reading, if any arrived
    pub luminosidade: Option<i32>,
    /// Illumination output level
    pub luzes: bool,
    /// Thermal device output level
    pub ar_condicionado: bool,
    /// Sequence number of this report
    pub contador: u64,
    /// Milliseconds since the engine started
    pub timestamp: u64,
}

/// Liveness document published on `.../custom`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub publish_count: u64,
    pub status: String,
}

impl HeartbeatReport {
    pub fn operational(publish_count: u64) -> Self {
        Self {
            publish_count,
            status: "operational".to_string(),
        }
    }
}

/// Kind of resource alert raised by the system monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowMemory,
    WeakSignal,
}

/// Alert document published on `.../alertas`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub value: i64,
    pub threshold: i64,
}

/// Serialize any gateway document to its JSON payload (pure function)
pub fn encode<T: Serialize>(document: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(document)
}
