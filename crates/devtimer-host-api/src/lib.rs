//! Gateway adapter trait interfaces for device-timer
//!
//! This crate defines the interface between the daemon core and the
//! platform code that reads per-device traffic counters and switches
//! network access. It contains no platform code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
