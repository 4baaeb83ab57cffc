//! Pure link attach/retry state machine
//!
//! The machine only decides; `NetworkLinkManager` applies the returned
//! `LinkAction` against the driver outside of any lock.

use std::net::IpAddr;
use tracing::{error, info, warn};

/// Link attachment state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Driver not started yet
    Idle,
    /// Association requested, waiting for the result
    Connecting,
    /// Associated with the access network
    Attached,
    /// Link lost, a retry is about to be issued
    Retrying,
    /// Retries exhausted; only the watchdog re-arms from here
    Failed,
}

/// Events reported by the underlying network stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Driver is up and ready to associate
    Started,
    /// Association succeeded
    Associated,
    /// Association failed or an established link dropped
    Lost { reason: String },
    /// Network address acquired on the link
    AddressAcquired(IpAddr),
}

/// What the manager must do after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    None,
    /// Ask the driver to associate
    RequestAssociation,
    /// Retry number `attempt` should be issued
    Retry { attempt: u32 },
    /// Retries exhausted
    GiveUp,
    /// Address acquired, report it
    ReportAddress(IpAddr),
}

/// Attach/retry bookkeeping for one link
#[derive(Debug, Clone)]
pub struct LinkStateMachine {
    state: LinkState,
    retry_count: u32,
    max_retries: u32,
    address: Option<IpAddr>,
}

impl LinkStateMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: LinkState::Idle,
            retry_count: 0,
            max_retries,
            address: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Idle -> Connecting when the driver is started
    pub fn begin(&mut self) {
        if self.state == LinkState::Idle {
            self.state = LinkState::Connecting;
        }
    }

    /// Apply a link-layer event
    pub fn on_event(&mut self, event: &LinkEvent) -> LinkAction {
        match event {
            LinkEvent::Started => match self.state {
                LinkState::Idle | LinkState::Connecting => {
                    self.state = LinkState::Connecting;
                    info!("Link driver started, associating");
                    LinkAction::RequestAssociation
                }
                _ => LinkAction::None,
            },
            LinkEvent::Associated => match self.state {
                LinkState::Connecting | LinkState::Retrying => {
                    self.state = LinkState::Attached;
                    info!(retries = self.retry_count, "Link attached");
                    LinkAction::None
                }
                _ => LinkAction::None,
            },
            LinkEvent::AddressAcquired(addr) => {
                self.retry_count = 0;
                self.address = Some(*addr);
                // An address proves the link works, whatever we believed before
                self.state = LinkState::Attached;
                LinkAction::ReportAddress(*addr)
            }
            LinkEvent::Lost { reason } => self.on_lost(reason),
        }
    }

    fn on_lost(&mut self, reason: &str) -> LinkAction {
        match self.state {
            LinkState::Failed | LinkState::Idle => LinkAction::None,
            LinkState::Connecting | LinkState::Attached | LinkState::Retrying => {
                self.address = None;
                if self.retry_count < self.max_retries {
                    self.retry_count += 1;
                    self.state = LinkState::Retrying;
                    warn!(
                        reason = %reason,
                        attempt = self.retry_count,
                        max = self.max_retries,
                        "Link lost, retrying"
                    );
                    LinkAction::Retry {
                        attempt: self.retry_count,
                    }
                } else {
                    self.state = LinkState::Failed;
                    error!(
                        reason = %reason,
                        max = self.max_retries,
                        "Link failed after exhausting retries"
                    );
                    LinkAction::GiveUp
                }
            }
        }
    }

    /// Retrying -> Connecting once the retry has been issued
    pub fn retry_issued(&mut self) {
        if self.state == LinkState::Retrying {
            self.state = LinkState::Connecting;
        }
    }

    /// Watchdog re-arm: clear retries and start associating again
    pub fn rearm(&mut self) -> LinkAction {
        self.retry_count = 0;
        self.state = LinkState::Connecting;
        LinkAction::RequestAssociation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn lost() -> LinkEvent {
        LinkEvent::Lost {
            reason: "beacon timeout".to_string(),
        }
    }

    fn address() -> LinkEvent {
        LinkEvent::AddressAcquired(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)))
    }

    #[test]
    fn test_happy_path() {
        let mut machine = LinkStateMachine::new(5);
        assert_eq!(machine.state(), LinkState::Idle);

        machine.begin();
        assert_eq!(machine.state(), LinkState::Connecting);

        assert_eq!(
            machine.on_event(&LinkEvent::Started),
            LinkAction::RequestAssociation
        );
        assert_eq!(machine.on_event(&LinkEvent::Associated), LinkAction::None);
        assert_eq!(machine.state(), LinkState::Attached);

        assert!(matches!(
            machine.on_event(&address()),
            LinkAction::ReportAddress(_)
        ));
        assert_eq!(
            machine.address(),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)))
        );
    }

    #[test]
    fn test_retries_then_fails() {
        let mut machine = LinkStateMachine::new(5);
        machine.begin();

        for attempt in 1..=5 {
            assert_eq!(machine.on_event(&lost()), LinkAction::Retry { attempt });
            assert_eq!(machine.state(), LinkState::Retrying);
            machine.retry_issued();
            assert_eq!(machine.state(), LinkState::Connecting);
        }

        assert_eq!(machine.on_event(&lost()), LinkAction::GiveUp);
        assert_eq!(machine.state(), LinkState::Failed);
        assert_eq!(machine.retry_count(), 5);

        // Failed is sticky until re-armed
        assert_eq!(machine.on_event(&lost()), LinkAction::None);
        assert_eq!(machine.on_event(&LinkEvent::Associated), LinkAction::None);
        assert_eq!(machine.state(), LinkState::Failed);
    }

    #[test]
    fn test_address_resets_retry_counter() {
        let mut machine = LinkStateMachine::new(5);
        machine.begin();
        machine.on_event(&lost());
        machine.retry_issued();
        machine.on_event(&lost());
        machine.retry_issued();
        assert_eq!(machine.retry_count(), 2);

        machine.on_event(&LinkEvent::Associated);
        machine.on_event(&address());
        assert_eq!(machine.retry_count(), 0);
        assert_eq!(machine.state(), LinkState::Attached);
    }

    #[test]
    fn test_attached_link_loss_retries() {
        let mut machine = LinkStateMachine::new(5);
        machine.begin();
        machine.on_event(&LinkEvent::Associated);
        machine.on_event(&address());

        assert_eq!(machine.on_event(&lost()), LinkAction::Retry { attempt: 1 });
        assert_eq!(machine.address(), None);
    }

    #[test]
    fn test_rearm_from_failed() {
        let mut machine = LinkStateMachine::new(1);
        machine.begin();
        machine.on_event(&lost());
        machine.retry_issued();
        machine.on_event(&lost());
        assert_eq!(machine.state(), LinkState::Failed);

        assert_eq!(machine.rearm(), LinkAction::RequestAssociation);
        assert_eq!(machine.state(), LinkState::Connecting);
        assert_eq!(machine.retry_count(), 0);

        machine.on_event(&LinkEvent::Associated);
        assert_eq!(machine.state(), LinkState::Attached);
    }

    #[test]
    fn test_lost_before_start_is_ignored() {
        let mut machine = LinkStateMachine::new(5);
        assert_eq!(machine.on_event(&lost()), LinkAction::None);
        assert_eq!(machine.state(), LinkState::Idle);
    }

    fn link_event() -> impl Strategy<Value = LinkEvent> {
        prop_oneof![
            Just(LinkEvent::Started),
            Just(LinkEvent::Associated),
            Just(lost()),
            Just(address()),
        ]
    }

    proptest! {
        #[test]
        fn retry_count_never_exceeds_max(
            max in 1u32..8,
            events in prop::collection::vec(link_event(), 0..64),
        ) {
            let mut machine = LinkStateMachine::new(max);
            machine.begin();
            for event in &events {
                let action = machine.on_event(event);
                if matches!(action, LinkAction::Retry { .. }) {
                    machine.retry_issued();
                }
                prop_assert!(machine.retry_count() <= max);
                if machine.state() == LinkState::Failed {
                    prop_assert_eq!(machine.retry_count(), max);
                }
            }
        }

        #[test]
        fn address_always_resets_retries(
            events in prop::collection::vec(link_event(), 0..32),
        ) {
            let mut machine = LinkStateMachine::new(5);
            machine.begin();
            for event in &events {
                if matches!(machine.on_event(event), LinkAction::Retry { .. }) {
                    machine.retry_issued();
                }
            }
            machine.on_event(&address());
            prop_assert_eq!(machine.retry_count(), 0);
        }
    }
}
