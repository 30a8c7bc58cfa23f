//! Validated policy structures

use crate::schedule::ScheduleEntry;
use crate::schema::{RawConfig, RawDaemonConfig, RawDevice};
use crate::threshold::{MIB, Threshold};
use crate::validation::{
    DEFAULT_POLL_INTERVAL_SECONDS, normalize_mac, parse_time, poll_interval_in_range,
};
use chrono::{NaiveTime, Weekday};
use devtimer_util::{DeviceId, builtin_data_dir, builtin_socket_path};
use std::path::PathBuf;
use std::time::Duration;

/// Threshold used when neither the device nor the daemon section sets one
pub const DEFAULT_THRESHOLD: Threshold = Threshold::from_bytes(6 * MIB);

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone)]
pub struct Policy {
    pub daemon: DaemonConfig,
    pub devices: Vec<Device>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            devices: raw.devices.into_iter().map(Device::from_raw).collect(),
        }
    }

    pub fn get_device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.id == id)
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Global monitoring switch; when off every device is treated as disabled
    pub enabled: bool,
    pub poll_interval_seconds: u32,
    pub default_threshold: Threshold,
    /// Wall-clock start of the usage day
    pub reset_time: NaiveTime,
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
}

impl DaemonConfig {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        let poll_interval_seconds = match raw.poll_interval_seconds {
            Some(secs) if poll_interval_in_range(secs) => secs,
            Some(secs) => {
                tracing::warn!(
                    poll_interval_seconds = secs,
                    "Poll interval out of range, using default"
                );
                DEFAULT_POLL_INTERVAL_SECONDS
            }
            None => DEFAULT_POLL_INTERVAL_SECONDS,
        };

        Self {
            enabled: raw.enabled.unwrap_or(true),
            poll_interval_seconds,
            default_threshold: raw
                .default_threshold
                .and_then(|t| t.parse().ok())
                .unwrap_or(DEFAULT_THRESHOLD),
            reset_time: raw
                .reset_time
                .and_then(|t| parse_time(&t).ok())
                .unwrap_or(NaiveTime::MIN),
            socket_path: raw.socket_path.unwrap_or_else(builtin_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(builtin_data_dir),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval_seconds))
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_raw(RawDaemonConfig::default())
    }
}

/// Validated device definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Lowercase `aa:bb:cc:dd:ee:ff`
    pub mac: String,
    pub enabled: bool,
    pub traffic_threshold: Option<Threshold>,
    pub schedule: Vec<ScheduleEntry>,
}

impl Device {
    fn from_raw(raw: RawDevice) -> Self {
        let schedule = raw
            .schedule
            .iter()
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();

        Self {
            id: DeviceId::new(raw.id),
            name: raw.name,
            mac: normalize_mac(&raw.mac).unwrap_or(raw.mac),
            enabled: raw.enabled,
            traffic_threshold: raw.traffic_threshold.and_then(|t| t.parse().ok()),
            schedule,
        }
    }

    /// Entries that belong to `weekday`, in configured order.
    pub fn entries_for(&self, weekday: Weekday) -> impl Iterator<Item = &ScheduleEntry> {
        self.schedule.iter().filter(move |e| e.weekday == weekday)
    }

    pub fn has_schedule_on(&self, weekday: Weekday) -> bool {
        self.entries_for(weekday).next().is_some()
    }
}
