//! Health snapshot of the running gateway
//!
//! A `HealthSnapshot` is computed on demand from the system probe, the link
//! driver's signal strength, engine uptime and the session flag. Nothing here
//! is persisted.

use crate::observability::statistics::Statistics;
use crate::protocol::messages::HealthReport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Signal strength reported when the link driver has no reading
pub const NO_SIGNAL_DBM: i32 = -127;

/// Reset reason reported for a normal power-on start
pub const RESET_REASON_POWER_ON: u32 = 1;

/// Source of platform memory figures
pub trait SystemProbe: Send + Sync {
    /// Currently free memory in bytes, `None` when the platform cannot tell
    fn free_memory(&self) -> Option<u64>;

    /// Lowest free memory observed since start
    fn min_free_memory(&self) -> Option<u64>;

    /// Platform-specific code for why the node last started
    fn reset_reason(&self) -> u32 {
        RESET_REASON_POWER_ON
    }
}

/// Probe for hosted targets reading `/proc/meminfo`
#[derive(Debug)]
pub struct HostProbe {
    min_seen: AtomicU64,
}

impl HostProbe {
    pub fn new() -> Self {
        Self {
            min_seen: AtomicU64::new(u64::MAX),
        }
    }

    fn read_available() -> Option<u64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_mem_available(&meminfo)
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn free_memory(&self) -> Option<u64> {
        let available = Self::read_available()?;
        self.min_seen.fetch_min(available, Ordering::Relaxed);
        Some(available)
    }

    fn min_free_memory(&self) -> Option<u64> {
        // Sample once so the minimum is never above the current value
        let _ = self.free_memory();
        match self.min_seen.load(Ordering::Relaxed) {
            u64::MAX => None,
            min => Some(min),
        }
    }
}

/// Extract `MemAvailable` in bytes from meminfo text (pure function)
pub fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Point-in-time health of the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub free_memory: Option<u64>,
    pub min_free_memory: Option<u64>,
    pub signal_strength: Option<i32>,
    pub uptime: Duration,
    pub session_connected: bool,
}

impl HealthSnapshot {
    pub fn capture(
        probe: &dyn SystemProbe,
        signal_strength: Option<i32>,
        uptime: Duration,
        session_connected: bool,
    ) -> Self {
        Self {
            free_memory: probe.free_memory(),
            min_free_memory: probe.min_free_memory(),
            signal_strength,
            uptime,
            session_connected,
        }
    }

    /// Signal strength in dBm, `NO_SIGNAL_DBM` when unknown
    pub fn rssi(&self) -> i32 {
        self.signal_strength.unwrap_or(NO_SIGNAL_DBM)
    }

    /// Combine with communication counters into the published health document
    pub fn to_report(&self, stats: &Statistics) -> HealthReport {
        HealthReport {
            free_heap: self.free_memory.unwrap_or(0),
            min_free_heap: self.min_free_memory.unwrap_or(0),
            wifi_rssi: self.rssi(),
            uptime_sec: self.uptime.as_secs(),
            mqtt_connected: u8::from(self.session_connected),
            msgs_sent: stats.published_total,
            msgs_received: stats.received_total,
            mqtt_failures: stats.publish_failures,
            disconnects: stats.disconnect_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::FixedProbe;

    #[test]
    fn test_parse_mem_available() {
        let meminfo = "MemTotal:       16314480 kB\nMemFree:         1234567 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(parse_mem_available(meminfo), Some(8_000_000 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
        assert_eq!(parse_mem_available("MemAvailable: lots kB\n"), None);
    }

    #[test]
    fn test_host_probe_min_never_exceeds_current() {
        let probe = HostProbe::new();
        if let (Some(free), Some(min)) = (probe.free_memory(), probe.min_free_memory()) {
            assert!(min <= free);
        }
    }

    #[test]
    fn test_snapshot_report_shape() {
        let probe = FixedProbe::new(45_000, 41_000);
        let snapshot =
            HealthSnapshot::capture(&probe, Some(-61), Duration::from_secs(3725), true);
        let stats = Statistics {
            published_total: 12,
            received_total: 7,
            publish_failures: 1,
            disconnect_count: 2,
            disconnected_time_ms: 400,
            last_message_ts: 99,
        };

        let json = serde_json::to_string(&snapshot.to_report(&stats)).unwrap();
        assert_eq!(
            json,
            r#"{"free_heap":45000,"min_free_heap":41000,"wifi_rssi":-61,"uptime_sec":3725,"mqtt_connected":1,"msgs_sent":12,"msgs_received":7,"mqtt_failures":1,"disconnects":2}"#
        );
    }

    #[test]
    fn test_unknown_signal_reports_floor() {
        let probe = FixedProbe::new(1, 1);
        let snapshot = HealthSnapshot::capture(&probe, None, Duration::ZERO, false);
        assert_eq!(snapshot.rssi(), NO_SIGNAL_DBM);
        assert_eq!(snapshot.to_report(&Statistics::default()).mqtt_connected, 0);
    }
}
