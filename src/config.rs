//! Gateway configuration system
//!
//! Configuration is a single TOML document with one section per subsystem.
//! Only `[mqtt].broker_url` is mandatory; every other field falls back to the
//! defaults the gateway ships with.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub link: LinkSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub reporting: ReportingSection,
}

/// Device identity reported in the boot message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    #[serde(default = "default_device_id")]
    pub id: String,
    /// Firmware version string
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
    /// Underlying platform/SDK version string
    #[serde(default = "default_platform_version")]
    pub platform_version: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            firmware_version: default_firmware_version(),
            platform_version: default_platform_version(),
        }
    }
}

fn default_device_id() -> String {
    "esp32_central".to_string()
}

fn default_firmware_version() -> String {
    "1.0.0".to_string()
}

fn default_platform_version() -> String {
    "host".to_string()
}

/// Network link section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// How long startup waits for the link to attach
    #[serde(default = "default_attach_timeout")]
    pub attach_timeout_secs: u64,
    /// Association retries before the link is declared failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Watchdog polling interval
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            attach_timeout_secs: default_attach_timeout(),
            max_retries: default_max_retries(),
            watchdog_interval_secs: default_watchdog_interval(),
        }
    }
}

fn default_attach_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_watchdog_interval() -> u64 {
    30
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long startup waits for the session to come up
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum MQTT packet size in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,
    /// Root of the gateway's own topics
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
}

impl MqttSection {
    /// Get MQTT username from environment variable
    pub fn get_username(&self) -> Option<String> {
        self.username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT password from environment variable
    pub fn get_password(&self) -> Option<String> {
        self.password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_max_packet_size() -> u32 {
    2048
}

fn default_topic_root() -> String {
    "demo/central".to_string()
}

/// Actuator control section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlSection {
    /// Illumination readings below this switch the lights on
    #[serde(default = "default_illumination_threshold")]
    pub illumination_threshold: i32,
    /// Temperature readings above this switch the thermal device on
    #[serde(default = "default_thermal_on_above")]
    pub thermal_on_above: i32,
    /// Temperature readings below this start the shutoff countdown
    #[serde(default = "default_thermal_off_below")]
    pub thermal_off_below: i32,
    /// How long a low temperature must persist before switching off
    #[serde(default = "default_shutoff_delay")]
    pub shutoff_delay_secs: u64,
    /// Interval of the periodic shutoff check
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Inbound payloads are truncated to this many bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Capacity of the inbound event queue feeding the control task
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            illumination_threshold: default_illumination_threshold(),
            thermal_on_above: default_thermal_on_above(),
            thermal_off_below: default_thermal_off_below(),
            shutoff_delay_secs: default_shutoff_delay(),
            check_interval_secs: default_check_interval(),
            max_payload_bytes: default_max_payload_bytes(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl ControlSection {
    pub fn shutoff_delay(&self) -> Duration {
        Duration::from_secs(self.shutoff_delay_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

fn default_illumination_threshold() -> i32 {
    3
}

fn default_thermal_on_above() -> i32 {
    23
}

fn default_thermal_off_below() -> i32 {
    20
}

fn default_shutoff_delay() -> u64 {
    600 // 10 minutes
}

fn default_check_interval() -> u64 {
    10
}

fn default_max_payload_bytes() -> usize {
    512
}

fn default_event_queue_capacity() -> usize {
    32
}

/// Periodic reporting section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportingSection {
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Free memory below this raises a low-memory alert
    #[serde(default = "default_low_memory_bytes")]
    pub low_memory_bytes: u64,
    /// Signal strength below this raises a weak-signal alert
    #[serde(default = "default_weak_signal_dbm")]
    pub weak_signal_dbm: i32,
}

impl Default for ReportingSection {
    fn default() -> Self {
        Self {
            telemetry_interval_secs: default_telemetry_interval(),
            health_interval_secs: default_health_interval(),
            monitor_interval_secs: default_monitor_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            low_memory_bytes: default_low_memory_bytes(),
            weak_signal_dbm: default_weak_signal_dbm(),
        }
    }
}

fn default_telemetry_interval() -> u64 {
    10
}

fn default_health_interval() -> u64 {
    60
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    300 // 5 minutes
}

fn default_low_memory_bytes() -> u64 {
    30_000
}

fn default_weak_signal_dbm() -> i32 {
    -80
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;

        let scheme = self
            .mqtt
            .broker_url
            .split_once("://")
            .map(|(scheme, _)| scheme);
        if !matches!(scheme, Some("mqtt") | Some("mqtts")) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker_url '{}' must use mqtt:// or mqtts://",
                self.mqtt.broker_url
            )));
        }

        if self.mqtt.topic_root.is_empty()
            || self.mqtt.topic_root.contains(['+', '#'])
            || self.mqtt.topic_root.ends_with('/')
        {
            return Err(ConfigError::InvalidConfig(format!(
                "topic_root '{}' must be a non-empty topic without wildcards or trailing slash",
                self.mqtt.topic_root
            )));
        }

        if self.link.max_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "link.max_retries must be greater than 0".to_string(),
            ));
        }

        if self.control.thermal_off_below >= self.control.thermal_on_above {
            return Err(ConfigError::InvalidConfig(format!(
                "control.thermal_off_below ({}) must be lower than control.thermal_on_above ({})",
                self.control.thermal_off_below, self.control.thermal_on_above
            )));
        }

        if self.control.max_payload_bytes == 0 || self.control.event_queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "control.max_payload_bytes and control.event_queue_capacity must be positive"
                    .to_string(),
            ));
        }

        let intervals = [
            ("link.attach_timeout_secs", self.link.attach_timeout_secs),
            ("link.watchdog_interval_secs", self.link.watchdog_interval_secs),
            ("mqtt.keep_alive_secs", self.mqtt.keep_alive_secs),
            ("mqtt.connect_timeout_secs", self.mqtt.connect_timeout_secs),
            ("control.check_interval_secs", self.control.check_interval_secs),
            (
                "reporting.telemetry_interval_secs",
                self.reporting.telemetry_interval_secs,
            ),
            (
                "reporting.health_interval_secs",
                self.reporting.health_interval_secs,
            ),
            (
                "reporting.monitor_interval_secs",
                self.reporting.monitor_interval_secs,
            ),
            (
                "reporting.heartbeat_interval_secs",
                self.reporting.heartbeat_interval_secs,
            ),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::InvalidConfig(format!(
                "{name} must be greater than 0"
            )));
        }

        Ok(())
    }

    /// Create a configuration with all defaults for a local broker
    pub fn with_broker(broker_url: &str) -> Self {
        Self {
            device: DeviceSection::default(),
            link: LinkSection::default(),
            mqtt: MqttSection {
                broker_url: broker_url.to_string(),
                username_env: None,
                password_env: None,
                keep_alive_secs: default_keep_alive(),
                connect_timeout_secs: default_connect_timeout(),
                max_packet_size: default_max_packet_size(),
                topic_root: default_topic_root(),
            },
            control: ControlSection::default(),
            reporting: ReportingSection::default(),
        }
    }
}

/// Validate device ID format
fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
