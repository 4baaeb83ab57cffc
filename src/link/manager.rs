//! Network link manager
//!
//! Owns the link state machine, pumps driver events through it and exposes
//! the current `LinkState` on a watch channel so `attach` and the broker
//! session can wait on it instead of polling.

use super::driver::LinkDriver;
use super::state::{LinkAction, LinkEvent, LinkState, LinkStateMachine};
use super::LinkError;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the driver event queue
const EVENT_QUEUE_CAPACITY: usize = 16;

/// Supervises the link attachment
pub struct NetworkLinkManager {
    driver: Arc<dyn LinkDriver>,
    machine: Mutex<LinkStateMachine>,
    state_tx: watch::Sender<LinkState>,
    events_tx: mpsc::Sender<LinkEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<LinkEvent>>>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkLinkManager {
    pub fn new(driver: Arc<dyn LinkDriver>, max_retries: u32) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Idle);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        Arc::new(Self {
            driver,
            machine: Mutex::new(LinkStateMachine::new(max_retries)),
            state_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            pump_handle: Mutex::new(None),
        })
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Subscribe to link state changes
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    pub fn is_attached(&self) -> bool {
        self.state() == LinkState::Attached
    }

    pub fn retry_count(&self) -> u32 {
        self.machine.lock().map(|m| m.retry_count()).unwrap_or(0)
    }

    /// Last acquired network address, if attached
    pub fn address(&self) -> Option<IpAddr> {
        self.machine.lock().ok().and_then(|m| m.address())
    }

    /// Signal strength of the link, only meaningful while attached
    pub fn signal_strength(&self) -> Option<i32> {
        if self.is_attached() {
            self.driver.signal_strength()
        } else {
            None
        }
    }

    /// Start the driver and the event pump; idempotent
    pub fn start(self: &Arc<Self>) -> Result<(), LinkError> {
        let events_rx = match self.events_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(mut events_rx) = events_rx else {
            debug!("Link manager already started");
            return Ok(());
        };

        let manager = Arc::downgrade(self);
        let span = crate::link_span!(component = "event_pump");
        let handle = tokio::spawn(
            async move {
                while let Some(event) = events_rx.recv().await {
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    manager.handle_event(event);
                }
                debug!("Link event pump stopped");
            }
            .instrument(span),
        );
        if let Ok(mut guard) = self.pump_handle.lock() {
            *guard = Some(handle);
        }

        self.update(|machine| {
            machine.begin();
            LinkAction::None
        });
        info!("Starting link driver");
        self.driver.start(self.events_tx.clone())
    }

    /// Start if needed, then wait until the link is attached or `timeout` elapses
    pub async fn attach(self: &Arc<Self>, timeout: Duration) -> Result<(), LinkError> {
        let mut state_rx = self.subscribe();
        self.start()?;
        Self::wait_for_attached(&mut state_rx, timeout).await?;

        info!(
            address = ?self.address(),
            "Link attached"
        );
        Ok(())
    }

    /// Wait on the state channel until Attached (pure async helper)
    async fn wait_for_attached(
        state_rx: &mut watch::Receiver<LinkState>,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if *state_rx.borrow_and_update() == LinkState::Attached {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(LinkError::ChannelClosed);
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout { waited: timeout }),
        }
    }

    /// Apply one link-layer event
    pub fn handle_event(&self, event: LinkEvent) {
        debug!(event = ?event, "Link event");
        let action = self.update(|machine| machine.on_event(&event));
        self.apply(action);
    }

    /// Watchdog hook: reset retries and start associating again
    pub fn rearm(&self) {
        info!("Re-arming link attach");
        let action = self.update(|machine| machine.rearm());
        self.apply(action);
    }

    fn update<F>(&self, f: F) -> LinkAction
    where
        F: FnOnce(&mut LinkStateMachine) -> LinkAction,
    {
        let Ok(mut machine) = self.machine.lock() else {
            error!("Link state machine lock poisoned");
            return LinkAction::None;
        };
        let action = f(&mut machine);
        let state = machine.state();

        // Published under the machine lock so the channel never lags a
        // concurrent transition
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
        action
    }

    fn apply(&self, action: LinkAction) {
        match action {
            LinkAction::None => {}
            LinkAction::RequestAssociation => self.request_association(),
            LinkAction::Retry { attempt } => {
                debug!(attempt, "Issuing link retry");
                self.update(|machine| {
                    machine.retry_issued();
                    LinkAction::None
                });
                self.request_association();
            }
            LinkAction::GiveUp => {
                error!("Link attach abandoned; waiting for watchdog");
            }
            LinkAction::ReportAddress(addr) => {
                info!(address = %addr, "Network address acquired");
            }
        }
    }

    fn request_association(&self) {
        if let Err(e) = self.driver.request_association() {
            warn!("Association request failed: {}", e);
        }
    }

    /// Stop the event pump
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.pump_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for NetworkLinkManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLinkDriver;

    #[tokio::test]
    async fn test_attach_succeeds_when_driver_associates() {
        let driver = Arc::new(MockLinkDriver::associating());
        let manager = NetworkLinkManager::new(driver.clone(), 5);

        manager.attach(Duration::from_secs(1)).await.unwrap();

        assert!(manager.is_attached());
        assert!(manager.address().is_some());
        assert_eq!(driver.association_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_times_out() {
        let driver = Arc::new(MockLinkDriver::silent());
        let manager = NetworkLinkManager::new(driver, 5);

        let result = manager.attach(Duration::from_secs(30)).await;

        assert!(matches!(result, Err(LinkError::Timeout { waited }) if waited == Duration::from_secs(30)));
        assert_eq!(manager.state(), LinkState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_driver_ends_in_failed_after_max_retries() {
        let driver = Arc::new(MockLinkDriver::failing());
        let manager = NetworkLinkManager::new(driver.clone(), 5);

        let result = manager.attach(Duration::from_secs(5)).await;

        assert!(result.is_err());
        assert_eq!(manager.state(), LinkState::Failed);
        assert_eq!(manager.retry_count(), 5);
        // Initial request plus one per retry
        assert_eq!(driver.association_requests(), 6);
    }

    #[tokio::test]
    async fn test_rearm_recovers_failed_link() {
        let driver = Arc::new(MockLinkDriver::silent());
        let manager = NetworkLinkManager::new(driver.clone(), 1);
        manager.start().unwrap();

        manager.handle_event(LinkEvent::Lost {
            reason: "auth".to_string(),
        });
        manager.handle_event(LinkEvent::Lost {
            reason: "auth".to_string(),
        });
        assert_eq!(manager.state(), LinkState::Failed);

        manager.rearm();
        assert_eq!(manager.state(), LinkState::Connecting);
        assert_eq!(manager.retry_count(), 0);

        manager.handle_event(LinkEvent::Associated);
        assert!(manager.is_attached());
    }

    #[tokio::test]
    async fn test_state_changes_are_broadcast() {
        let driver = Arc::new(MockLinkDriver::silent());
        let manager = NetworkLinkManager::new(driver, 5);
        let mut rx = manager.subscribe();
        manager.start().unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), LinkState::Connecting);

        manager.handle_event(LinkEvent::Associated);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LinkState::Attached);
    }

    #[test]
    fn test_state_channel_tracks_machine_under_contention() {
        let manager = NetworkLinkManager::new(Arc::new(MockLinkDriver::silent()), 3);
        manager.update(|machine| {
            machine.begin();
            LinkAction::None
        });

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    for round in 0..500 {
                        match (worker + round) % 3 {
                            0 => manager.handle_event(LinkEvent::Lost {
                                reason: "contention".to_string(),
                            }),
                            1 => manager.rearm(),
                            _ => manager.handle_event(LinkEvent::Associated),
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let machine_state = manager.machine.lock().unwrap().state();
        assert_eq!(manager.state(), machine_state);
    }

    #[tokio::test]
    async fn test_pump_does_not_keep_manager_alive() {
        let manager = NetworkLinkManager::new(Arc::new(MockLinkDriver::associating()), 5);
        manager.attach(Duration::from_secs(1)).await.unwrap();
        let weak = Arc::downgrade(&manager);

        drop(manager);
        tokio::task::yield_now().await;

        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_signal_strength_only_when_attached() {
        let driver = Arc::new(MockLinkDriver::associating().with_signal(-58));
        let manager = NetworkLinkManager::new(driver, 5);
        assert_eq!(manager.signal_strength(), None);

        manager.attach(Duration::from_secs(1)).await.unwrap();
        assert_eq!(manager.signal_strength(), Some(-58));
    }
}
