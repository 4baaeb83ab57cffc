//! Network stack seam
//!
//! A `LinkDriver` turns association requests into `LinkEvent`s delivered on
//! the channel handed to `start`. Drivers must never block the caller; events
//! are pushed with `try_send` so the driver's own context returns immediately.

use super::state::LinkEvent;
use super::LinkError;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Underlying network stack driving the link
pub trait LinkDriver: Send + Sync {
    /// Bring the driver up; events are reported on `events` from now on
    fn start(&self, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError>;

    /// Ask the stack to (re)associate; the outcome arrives as an event
    fn request_association(&self) -> Result<(), LinkError>;

    /// Received signal strength in dBm, if associated and known
    fn signal_strength(&self) -> Option<i32>;
}

/// Push an event without blocking (pure helper shared by drivers)
pub fn emit(events: &mpsc::Sender<LinkEvent>, event: LinkEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("Link event dropped: {}", e);
    }
}

/// Default probe target; TEST-NET-2, never actually contacted
pub const DEFAULT_PROBE_TARGET: &str = "198.51.100.1:9";

/// Link driver for hosted targets
///
/// The host's own network stack is the link. Association succeeds when a
/// routable local address exists for the probe target; a connected UDP socket
/// is used for the route lookup, so no packet is sent.
#[derive(Debug)]
pub struct HostLinkDriver {
    probe_target: SocketAddr,
    events: Mutex<Option<mpsc::Sender<LinkEvent>>>,
}

impl HostLinkDriver {
    pub fn new() -> Self {
        Self::with_probe_target(
            DEFAULT_PROBE_TARGET
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([198, 51, 100, 1], 9))),
        )
    }

    pub fn with_probe_target(probe_target: SocketAddr) -> Self {
        Self {
            probe_target,
            events: Mutex::new(None),
        }
    }

    /// Find the local address the host would use to reach `target`
    pub fn probe_local_address(target: SocketAddr) -> std::io::Result<IpAddr> {
        let bind_addr: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(target)?;
        let local = socket.local_addr()?.ip();
        if local.is_unspecified() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "no routable local address",
            ));
        }
        Ok(local)
    }

    fn sender(&self) -> Option<mpsc::Sender<LinkEvent>> {
        self.events.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Default for HostLinkDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDriver for HostLinkDriver {
    fn start(&self, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| LinkError::DriverStart("driver state poisoned".to_string()))?;
        emit(&events, LinkEvent::Started);
        *guard = Some(events);
        Ok(())
    }

    fn request_association(&self) -> Result<(), LinkError> {
        let events = self.sender().ok_or(LinkError::NotStarted)?;

        match Self::probe_local_address(self.probe_target) {
            Ok(addr) => {
                debug!(address = %addr, "Host route available");
                emit(&events, LinkEvent::Associated);
                emit(&events, LinkEvent::AddressAcquired(addr));
            }
            Err(e) => emit(
                &events,
                LinkEvent::Lost {
                    reason: e.to_string(),
                },
            ),
        }
        Ok(())
    }

    fn signal_strength(&self) -> Option<i32> {
        // Wired/hosted links have no radio
        None
    }
}
