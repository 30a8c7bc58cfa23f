//! Core events emitted by the engine and the calibration manager

use chrono::NaiveDate;
use devtimer_api::{CalibrationSnapshot, DeviceState};
use devtimer_util::DeviceId;

/// Events emitted by the core
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A device moved between enforcement states
    DeviceStateChanged {
        device_id: DeviceId,
        from: Option<DeviceState>,
        to: DeviceState,
    },

    /// Gateway access for a device was switched
    AccessChanged { device_id: DeviceId, blocked: bool },

    /// Usage counters started a new day
    UsageDayRolledOver { day: NaiveDate },

    /// A calibration session changed status
    CalibrationChanged(CalibrationSnapshot),
}
