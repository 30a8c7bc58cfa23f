//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use devtimer_api::DeviceState;
use devtimer_util::DeviceId;
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    DaemonStarted,

    DaemonStopped,

    /// Policy loaded at startup
    PolicyLoaded { device_count: usize },

    /// Usage counters started a new day
    UsageDayRolledOver { day: NaiveDate },

    /// Device moved between enforcement states
    DeviceStateChanged {
        device_id: DeviceId,
        from: Option<DeviceState>,
        to: DeviceState,
    },

    /// Gateway access for a device was switched
    AccessChanged { device_id: DeviceId, blocked: bool },

    CalibrationStarted {
        device_id: DeviceId,
        duration_seconds: u64,
        sample_interval_seconds: u64,
    },

    CalibrationCompleted {
        device_id: DeviceId,
        sample_count: usize,
        p90: u64,
        recommended: u64,
    },

    CalibrationFailed { device_id: DeviceId, message: String },

    CalibrationCancelled { device_id: DeviceId },

    /// Calibrated threshold persisted as the device's override
    ThresholdApplied { device_id: DeviceId, threshold: String },

    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Row ID, assigned by the store
    pub id: i64,
    pub timestamp: DateTime<Local>,
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0,
            timestamp: devtimer_util::now(),
            event,
        }
    }
}
