//! Store trait definitions

use chrono::NaiveDate;
use devtimer_util::DeviceId;
use std::time::Duration;

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Usage accounting

    /// Get counted usage for a device on a usage day
    fn get_usage(&self, device_id: &DeviceId, day: NaiveDate) -> StoreResult<Duration>;

    /// Add usage for a device on a usage day
    fn add_usage(&self, device_id: &DeviceId, day: NaiveDate, duration: Duration) -> StoreResult<()>;

    /// Drop usage rows older than `day`; returns the number removed
    fn prune_usage_before(&self, day: NaiveDate) -> StoreResult<usize>;

    // Threshold overrides

    /// Calibrated threshold for a device, in bytes per minute
    fn get_threshold_override(&self, device_id: &DeviceId) -> StoreResult<Option<u64>>;

    fn set_threshold_override(&self, device_id: &DeviceId, bytes_per_minute: u64) -> StoreResult<()>;

    // Daily reset

    fn get_last_reset_date(&self) -> StoreResult<Option<NaiveDate>>;

    fn set_last_reset_date(&self, day: NaiveDate) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
