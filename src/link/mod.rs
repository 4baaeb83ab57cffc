//! Network link supervision
//!
//! - [`state`] - pure attach/retry state machine
//! - [`driver`] - seam to the underlying network stack
//! - [`manager`] - event pump and bounded attach wait
//! - [`watchdog`] - periodic re-arm of a detached link

pub mod driver;
pub mod manager;
pub mod state;
pub mod watchdog;

pub use driver::{HostLinkDriver, LinkDriver};
pub use manager::NetworkLinkManager;
pub use state::{LinkAction, LinkEvent, LinkState, LinkStateMachine};
pub use watchdog::{LinkWatchdog, WatchdogVerdict};

use std::time::Duration;
use thiserror::Error;

/// Link layer errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link driver failed to start: {0}")]
    DriverStart(String),
    #[error("Link driver not started")]
    NotStarted,
    #[error("Link not attached after {waited:?}")]
    Timeout { waited: Duration },
    #[error("Link state channel closed")]
    ChannelClosed,
}
