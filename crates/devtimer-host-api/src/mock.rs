//! Mock gateway adapter for testing

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::{HostAdapter, HostError, HostResult};

#[derive(Debug, Default)]
struct MockState {
    counters: HashMap<String, u64>,
    /// Bytes added to a counter after each read
    growth: HashMap<String, u64>,
    blocked: HashSet<String>,
    block_calls: Vec<(String, bool)>,
    fail_reads: bool,
    fail_block: bool,
    read_delay: Option<Duration>,
}

/// Mock gateway adapter for unit/integration testing
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_counter(&self, mac: &str, bytes: u64) {
        self.state.lock().counters.insert(mac.to_string(), bytes);
    }

    pub fn add_bytes(&self, mac: &str, bytes: u64) {
        *self.state.lock().counters.entry(mac.to_string()).or_default() += bytes;
    }

    /// Make the counter grow by `bytes` after every read.
    pub fn set_growth(&self, mac: &str, bytes: u64) {
        let mut state = self.state.lock();
        state.counters.entry(mac.to_string()).or_default();
        state.growth.insert(mac.to_string(), bytes);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    pub fn set_fail_block(&self, fail: bool) {
        self.state.lock().fail_block = fail;
    }

    /// Delay every read, to exercise timeouts.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().read_delay = delay;
    }

    pub fn is_blocked(&self, mac: &str) -> bool {
        self.state.lock().blocked.contains(mac)
    }

    /// Every `set_blocked` call so far, in order.
    pub fn block_calls(&self) -> Vec<(String, bool)> {
        self.state.lock().block_calls.clone()
    }
}

#[async_trait]
impl HostAdapter for MockHost {
    async fn read_bytes(&self, mac: &str) -> HostResult<u64> {
        let delay = self.state.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(HostError::CommandFailed("Mock read failure".into()));
        }

        let growth = state.growth.get(mac).copied().unwrap_or(0);
        let counter = state
            .counters
            .get_mut(mac)
            .ok_or_else(|| HostError::CounterUnavailable(mac.to_string()))?;
        let value = *counter;
        *counter += growth;
        Ok(value)
    }

    async fn set_blocked(&self, mac: &str, blocked: bool) -> HostResult<()> {
        let mut state = self.state.lock();
        state.block_calls.push((mac.to_string(), blocked));
        if state.fail_block {
            return Err(HostError::CommandFailed("Mock block failure".into()));
        }

        if blocked {
            state.blocked.insert(mac.to_string());
        } else {
            state.blocked.remove(mac);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_grow_after_each_read() {
        let host = MockHost::new();
        host.set_counter("aa:bb:cc:dd:ee:ff", 1000);
        host.set_growth("aa:bb:cc:dd:ee:ff", 500);

        assert_eq!(host.read_bytes("aa:bb:cc:dd:ee:ff").await.unwrap(), 1000);
        assert_eq!(host.read_bytes("aa:bb:cc:dd:ee:ff").await.unwrap(), 1500);
    }

    #[tokio::test]
    async fn unknown_mac_has_no_counter() {
        let host = MockHost::new();
        let err = host.read_bytes("00:00:00:00:00:01").await.unwrap_err();
        assert!(matches!(err, HostError::CounterUnavailable(_)));
    }

    #[tokio::test]
    async fn failures_are_configurable() {
        let host = MockHost::new();
        host.set_counter("aa:bb:cc:dd:ee:ff", 1);
        host.set_fail_reads(true);
        assert!(host.read_bytes("aa:bb:cc:dd:ee:ff").await.is_err());

        host.set_fail_block(true);
        assert!(host.set_blocked("aa:bb:cc:dd:ee:ff", true).await.is_err());
        assert!(!host.is_blocked("aa:bb:cc:dd:ee:ff"));
        assert_eq!(host.block_calls().len(), 1);
    }

    #[tokio::test]
    async fn block_and_unblock() {
        let host = MockHost::new();
        host.set_blocked("aa:bb:cc:dd:ee:ff", true).await.unwrap();
        assert!(host.is_blocked("aa:bb:cc:dd:ee:ff"));
        host.set_blocked("aa:bb:cc:dd:ee:ff", false).await.unwrap();
        assert!(!host.is_blocked("aa:bb:cc:dd:ee:ff"));
    }
}
