//! Shared utilities for device-timer
//!
//! This crate provides:
//! - ID types (DeviceId, ClientId)
//! - Wall-clock helpers (mockable now, minute-of-day ranges, usage days)
//! - Default paths for socket, data, and config files

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
