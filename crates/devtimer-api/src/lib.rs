//! Protocol types for the device-timer daemon
//!
//! This crate defines the stable API between the daemon and its clients
//! (the administrative UI bridge and `devtimerctl`):
//! - Commands (requests from clients)
//! - Responses
//! - Events (daemon -> subscribed clients)
//! - Shared view types (device state, calibration snapshots, daemon status)

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
