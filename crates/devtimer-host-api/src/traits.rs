//! Gateway adapter traits

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from gateway adapter operations
#[derive(Debug, Error)]
pub enum HostError {
    /// No traffic counter exists for the address
    #[error("No traffic counter for {0}")]
    CounterUnavailable(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Unexpected output: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HostResult<T> = Result<T, HostError>;

/// Gateway adapter trait - implemented by platform-specific adapters
///
/// Devices are addressed by lowercase MAC address.
#[async_trait]
pub trait HostAdapter: Send + Sync {
    /// Read the cumulative byte counter for a device.
    ///
    /// The counter only grows, except when the gateway resets it.
    async fn read_bytes(&self, mac: &str) -> HostResult<u64>;

    /// Cut off or restore a device's network access.
    async fn set_blocked(&self, mac: &str, blocked: bool) -> HostResult<()>;

    /// Optional: check if the adapter is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}
