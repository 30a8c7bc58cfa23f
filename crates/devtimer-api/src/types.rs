//! Shared types for the device-timer API

use chrono::{DateTime, Local, NaiveDate};
use devtimer_util::DeviceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Enforcement classification of a device at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Device (or monitoring as a whole) is switched off
    Disabled,
    /// No schedule entry for today's weekday
    NoSchedule,
    /// Today has windows, but none covers the current time
    OutsideWindow,
    /// Inside a limited window with minutes left
    Active,
    /// Inside a limited window with the limit used up
    Blocked,
    /// Inside a window without a limit
    Unlimited,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Disabled => "disabled",
            DeviceState::NoSchedule => "no_schedule",
            DeviceState::OutsideWindow => "outside_window",
            DeviceState::Active => "active",
            DeviceState::Blocked => "blocked",
            DeviceState::Unlimited => "unlimited",
        }
    }

    /// Whether the gateway should cut this device off.
    pub fn denies_access(&self) -> bool {
        matches!(self, DeviceState::Blocked | DeviceState::OutsideWindow)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device as seen by the administrative UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceView {
    pub id: DeviceId,
    pub name: String,
    pub mac: String,
    pub enabled: bool,
    pub status: DeviceState,
    /// Whole minutes counted toward today's usage
    pub usage_minutes: u32,
    /// Limit of the window covering now; `None` outside windows or when unlimited
    pub todays_limit: Option<u32>,
    /// `max(0, limit - usage)`; `None` outside windows or when unlimited
    pub remaining_minutes: Option<u32>,
    pub has_schedule_today: bool,
    pub in_time_window: bool,
    /// Effective usage-detection threshold, e.g. `6M`
    pub traffic_threshold: String,
}

/// Calibration session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl CalibrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationStatus::Idle => "idle",
            CalibrationStatus::Running => "running",
            CalibrationStatus::Completed => "completed",
            CalibrationStatus::Error => "error",
        }
    }
}

impl fmt::Display for CalibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a device's calibration session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    pub device_id: DeviceId,
    pub status: CalibrationStatus,
    pub start_time: Option<DateTime<Local>>,
    pub duration_seconds: u64,
    pub sample_interval_seconds: u64,
    pub elapsed_seconds: u64,
    pub sample_count: usize,
    /// Byte-rate samples in bytes per minute, oldest first
    pub samples: Vec<u64>,
    pub progress_percent: u8,
    /// 90th percentile of the samples, bytes per minute
    pub result_p90: Option<u64>,
    /// Recommended threshold, bytes per minute
    pub result_recommended: Option<u64>,
    /// Recommended threshold in wire format, e.g. `640K`
    pub recommended_threshold: Option<String>,
    pub error_message: Option<String>,
}

impl CalibrationSnapshot {
    /// Snapshot of a device that never ran a calibration.
    pub fn idle(device_id: DeviceId) -> Self {
        Self {
            device_id,
            status: CalibrationStatus::Idle,
            start_time: None,
            duration_seconds: 0,
            sample_interval_seconds: 0,
            elapsed_seconds: 0,
            sample_count: 0,
            samples: Vec::new(),
            progress_percent: 0,
            result_p90: None,
            result_recommended: None,
            recommended_threshold: None,
            error_message: None,
        }
    }
}

/// Process-wide daemon status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    /// Global monitoring switch from the config
    pub monitoring_enabled: bool,
    pub poll_interval_seconds: u32,
    /// Usage day the counters were last reset for
    pub last_reset_date: Option<NaiveDate>,
    pub device_count: usize,
    /// Calibration sessions currently sampling
    pub active_calibrations: usize,
}

/// Immutable snapshot published by the polling coordinator after each tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Local>,
    pub daemon: DaemonStatus,
    pub devices: Vec<DeviceView>,
}

/// One audit log row as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Local>,
    /// The recorded event, tagged by `type`
    pub event: serde_json::Value,
}

/// Client role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Root or the daemon's own user
    Admin,
    /// Anyone else who can reach the socket
    Observer,
}

impl ClientRole {
    /// Starting, cancelling and applying calibrations changes gateway state.
    pub fn can_manage_calibration(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub host_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_state_wire_names() {
        let json = serde_json::to_string(&DeviceState::OutsideWindow).unwrap();
        assert_eq!(json, "\"outside_window\"");

        let parsed: DeviceState = serde_json::from_str("\"no_schedule\"").unwrap();
        assert_eq!(parsed, DeviceState::NoSchedule);
        assert_eq!(DeviceState::NoSchedule.to_string(), "no_schedule");
    }

    #[test]
    fn only_blocked_and_outside_window_deny_access() {
        assert!(DeviceState::Blocked.denies_access());
        assert!(DeviceState::OutsideWindow.denies_access());
        assert!(!DeviceState::Active.denies_access());
        assert!(!DeviceState::Unlimited.denies_access());
        assert!(!DeviceState::NoSchedule.denies_access());
        assert!(!DeviceState::Disabled.denies_access());
    }

    #[test]
    fn idle_snapshot_is_empty() {
        let snap = CalibrationSnapshot::idle(DeviceId::new("tv"));
        assert_eq!(snap.status, CalibrationStatus::Idle);
        assert!(snap.samples.is_empty());
        assert_eq!(snap.progress_percent, 0);
    }

    #[test]
    fn observers_cannot_manage_calibration() {
        assert!(ClientRole::Admin.can_manage_calibration());
        assert!(!ClientRole::Observer.can_manage_calibration());
    }
}
