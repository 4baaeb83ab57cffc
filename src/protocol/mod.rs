//! Topics and payload documents of the gateway
//!
//! This module fixes the topic layout under the configured root and the JSON
//! shapes of everything the gateway publishes.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
