//! Command types for the device-timer protocol

use devtimer_util::{ClientId, DeviceId};
use serde::{Deserialize, Serialize};

use crate::{
    API_VERSION, AuditEntry, CalibrationSnapshot, ClientRole, DaemonStatus, DeviceView, HealthStatus,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ResponseResult::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    DeviceNotFound,
    /// A calibration is already running for the device
    SessionBusy,
    /// Cancel/apply from a status that does not allow it
    InvalidSessionState,
    /// Malformed schedule or threshold string
    InvalidFormat,
    /// Overlapping schedule entries
    ScheduleConflict,
    PermissionDenied,
    StoreError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Devices with their current state and usage
    ListDevices,

    /// Process-wide daemon status
    GetDaemonStatus,

    /// Begin measuring a device's idle traffic
    StartCalibration {
        device_id: DeviceId,
        duration_seconds: u64,
        sample_interval_seconds: u64,
    },

    GetCalibration { device_id: DeviceId },

    /// Persist the recommended threshold of a completed calibration
    ApplyCalibration { device_id: DeviceId },

    CancelCalibration { device_id: DeviceId },

    /// Check a device's schedule list before committing it to the config
    ValidateSchedule { entries: Vec<String> },

    /// Most recent audit log entries, newest first
    GetAuditLog { limit: usize },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    UnsubscribeEvents,

    GetHealth,

    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Devices { devices: Vec<DeviceView> },
    DaemonStatus(DaemonStatus),
    CalibrationStarted(CalibrationSnapshot),
    Calibration(CalibrationSnapshot),
    CalibrationApplied { threshold: String },
    CalibrationCancelled,
    ScheduleValid { entry_count: usize },
    AuditLog { entries: Vec<AuditEntry> },
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
