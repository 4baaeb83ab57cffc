//! Link watchdog
//!
//! Periodically checks the link and re-arms the attach sequence when it is
//! found detached. Runs as its own task so a stuck link never stalls the
//! control or reporting tasks.

use super::manager::NetworkLinkManager;
use super::state::LinkState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one watchdog pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Link attached, nothing to do
    Healthy,
    /// Link not started yet, nothing to supervise
    Dormant,
    /// Link detached, attach sequence re-armed
    Rearmed,
}

pub struct LinkWatchdog {
    link: Arc<NetworkLinkManager>,
    interval: Duration,
}

impl LinkWatchdog {
    pub fn new(link: Arc<NetworkLinkManager>, interval: Duration) -> Self {
        Self { link, interval }
    }

    /// Inspect the link once and re-arm it if needed
    pub fn check_once(&self) -> WatchdogVerdict {
        match self.link.state() {
            LinkState::Attached => {
                debug!("Watchdog: link attached");
                WatchdogVerdict::Healthy
            }
            LinkState::Idle => WatchdogVerdict::Dormant,
            state => {
                warn!(state = ?state, retries = self.link.retry_count(), "Watchdog: link detached, re-arming");
                self.link.rearm();
                WatchdogVerdict::Rearmed
            }
        }
    }

    /// Run the watchdog loop until the returned handle is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Link watchdog started");
            let mut interval = tokio::time::interval(self.interval);
            interval.tick().await; // First tick completes immediately, skip it

            loop {
                interval.tick().await;
                self.check_once();
            }
        })
    }
}
