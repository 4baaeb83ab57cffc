//! Testing utilities and mock implementations
//!
//! Mocks for the broker client, link driver, system probe and output lines
//! so the gateway can be tested without a broker or hardware.

pub mod mocks;

pub use mocks::*;
