//! Inbound message routing
//!
//! [`EventRouter`] sits between the broker session and the control engine.
//! Only the two sensor topics reach the engine; commands and configuration
//! updates are logged, everything else is dropped.

pub mod router;

pub use router::{parse_reading, EventRouter, InboundReading, RouteOutcome};
