//! Linux gateway adapter for device-timer
//!
//! Drives an nftables ruleset that is provisioned alongside the daemon:
//! - one named counter per device, `dt_<mac without colons>`
//! - a set of hardware addresses whose traffic is dropped

mod nftables;

pub use nftables::*;
