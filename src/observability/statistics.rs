//! Communication statistics
//!
//! One mutex guards the whole record so a snapshot never observes a
//! half-applied update, even with the session event loop and every
//! publisher writing concurrently.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

/// Communication counters for the broker session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub published_total: u64,
    pub received_total: u64,
    pub publish_failures: u64,
    pub disconnect_count: u64,
    pub disconnected_time_ms: u64,
    /// Milliseconds since the registry was created, 0 if nothing arrived yet
    pub last_message_ts: u64,
}

/// Events that update the statistics record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    /// A publish was handed to the broker client
    Published,
    /// An inbound message was delivered
    Received,
    /// A publish or subscribe was refused or failed
    PublishFailure,
    /// The broker session was lost
    Disconnected,
    /// The session came back after being offline for this long
    OfflineTime { millis: u64 },
}

/// Shared statistics registry
#[derive(Debug)]
pub struct StatisticsRegistry {
    inner: Mutex<Statistics>,
    started: Instant,
}

impl StatisticsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Statistics::default()),
            started: Instant::now(),
        }
    }

    /// Apply one event to the record
    pub fn record(&self, event: StatEvent) {
        let now_ms = self.started.elapsed().as_millis() as u64;
        if let Ok(mut stats) = self.inner.lock() {
            apply_event(&mut stats, event, now_ms);
        }
    }

    /// Zero every counter except the disconnect bookkeeping
    pub fn reset(&self) {
        if let Ok(mut stats) = self.inner.lock() {
            *stats = Statistics {
                disconnect_count: stats.disconnect_count,
                disconnected_time_ms: stats.disconnected_time_ms,
                ..Statistics::default()
            };
        }
        info!("Statistics reset");
    }

    /// Consistent copy of the current record
    pub fn snapshot(&self) -> Statistics {
        self.inner.lock().map(|stats| *stats).unwrap_or_default()
    }

    /// Log the statistics block
    pub fn log_summary(&self) {
        let stats = self.snapshot();
        info!(
            published = stats.published_total,
            received = stats.received_total,
            failures = stats.publish_failures,
            disconnects = stats.disconnect_count,
            offline_ms = stats.disconnected_time_ms,
            "MQTT statistics"
        );
    }
}

impl Default for StatisticsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_event(stats: &mut Statistics, event: StatEvent, now_ms: u64) {
    match event {
        StatEvent::Published => stats.published_total += 1,
        StatEvent::Received => {
            stats.received_total += 1;
            stats.last_message_ts = now_ms;
        }
        StatEvent::PublishFailure => stats.publish_failures += 1,
        StatEvent::Disconnected => stats.disconnect_count += 1,
        StatEvent::OfflineTime { millis } => {
            stats.disconnected_time_ms = stats.disconnected_time_ms.saturating_add(millis)
        }
    }
}
