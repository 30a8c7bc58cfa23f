//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global daemon settings
    #[serde(default)]
    pub daemon: RawDaemonConfig,

    /// Monitored devices
    #[serde(default)]
    pub devices: Vec<RawDevice>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    /// Global monitoring switch (default: true)
    pub enabled: Option<bool>,

    /// Seconds between polling ticks, 10..=300 (default: 60)
    pub poll_interval_seconds: Option<u32>,

    /// Threshold applied to devices without their own (default: 6M)
    pub default_threshold: Option<String>,

    /// Wall-clock time the usage day starts, `HH:MM` (default: 00:00)
    pub reset_time: Option<String>,

    /// IPC socket path (default: /run/device-timer/device-timer.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,
}

/// Raw device definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDevice {
    /// Unique stable ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Hardware address, `aa:bb:cc:dd:ee:ff`
    pub mac: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-device threshold, e.g. `512K`
    pub traffic_threshold: Option<String>,

    /// Schedule entries, `Day,HH:MM-HH:MM,Limit`
    #[serde(default)]
    pub schedule: Vec<String>,
}

fn default_true() -> bool {
    true
}
