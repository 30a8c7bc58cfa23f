//! Event types for daemon -> client streaming

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{API_VERSION, CalibrationSnapshot, StatusSnapshot};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: devtimer_util::now(),
            payload,
        }
    }
}

/// All possible events from the daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Fresh snapshot after a polling tick
    StatusUpdated(StatusSnapshot),

    /// A calibration session changed status
    CalibrationChanged(CalibrationSnapshot),

    /// Usage counters started a new day
    UsageDayRolledOver { day: NaiveDate },

    /// Daemon is shutting down
    Shutdown,
}
