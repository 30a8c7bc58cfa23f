//! nftables-backed gateway adapter

use async_trait::async_trait;
use devtimer_host_api::{HostAdapter, HostError, HostResult};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Where the adapter finds its counters and block set
#[derive(Debug, Clone)]
pub struct NftablesConfig {
    pub nft_path: PathBuf,
    pub family: String,
    pub table: String,
    pub block_set: String,
    pub counter_prefix: String,
    /// Upper bound for a single `nft` invocation
    pub command_timeout: Duration,
}

impl Default for NftablesConfig {
    fn default() -> Self {
        Self {
            nft_path: PathBuf::from("nft"),
            family: "inet".into(),
            table: "device_timer".into(),
            block_set: "blocked_macs".into(),
            counter_prefix: "dt_".into(),
            command_timeout: Duration::from_secs(3),
        }
    }
}

/// Gateway adapter that shells out to `nft`
pub struct NftablesHost {
    config: NftablesConfig,
    healthy: AtomicBool,
}

impl NftablesHost {
    pub fn new(config: NftablesConfig) -> Self {
        info!(
            family = %config.family,
            table = %config.table,
            block_set = %config.block_set,
            "Using nftables gateway adapter"
        );
        Self {
            config,
            healthy: AtomicBool::new(true),
        }
    }

    /// Counter object name for a device.
    pub fn counter_name(&self, mac: &str) -> String {
        let compact: String = mac
            .chars()
            .filter(|c| *c != ':')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        format!("{}{}", self.config.counter_prefix, compact)
    }

    async fn run(&self, args: &[&str]) -> HostResult<String> {
        debug!(?args, "Running nft");

        let output = Command::new(&self.config.nft_path)
            .args(args)
            .kill_on_drop(true)
            .output();

        let result = match tokio::time::timeout(self.config.command_timeout, output).await {
            Err(_) => Err(HostError::Timeout(self.config.command_timeout)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(HostError::PermissionDenied(e.to_string()))
            }
            Ok(Err(e)) => Err(HostError::Io(e)),
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => Err(HostError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        };

        self.healthy.store(
            !matches!(result, Err(HostError::Timeout(_) | HostError::Io(_) | HostError::PermissionDenied(_))),
            Ordering::Relaxed,
        );
        result
    }
}

#[derive(Debug, Deserialize)]
struct NftOutput {
    nftables: Vec<NftObject>,
}

#[derive(Debug, Deserialize)]
struct NftObject {
    counter: Option<NftCounter>,
}

#[derive(Debug, Deserialize)]
struct NftCounter {
    name: String,
    bytes: u64,
}

/// Extract the byte count of `name` from `nft -j list counter` output.
pub fn parse_counter_bytes(json: &str, name: &str) -> HostResult<u64> {
    let output: NftOutput =
        serde_json::from_str(json).map_err(|e| HostError::Parse(e.to_string()))?;

    output
        .nftables
        .into_iter()
        .filter_map(|obj| obj.counter)
        .find(|c| c.name == name)
        .map(|c| c.bytes)
        .ok_or_else(|| HostError::Parse(format!("counter {name} missing from output")))
}

fn is_missing_object(err: &HostError) -> bool {
    matches!(err, HostError::CommandFailed(msg) if msg.contains("No such file or directory"))
}

#[async_trait]
impl HostAdapter for NftablesHost {
    async fn read_bytes(&self, mac: &str) -> HostResult<u64> {
        let name = self.counter_name(mac);
        let cfg = &self.config;

        let json = self
            .run(&["-j", "list", "counter", &cfg.family, &cfg.table, &name])
            .await
            .map_err(|e| {
                if is_missing_object(&e) {
                    HostError::CounterUnavailable(mac.to_string())
                } else {
                    e
                }
            })?;

        parse_counter_bytes(&json, &name)
    }

    async fn set_blocked(&self, mac: &str, blocked: bool) -> HostResult<()> {
        let cfg = &self.config;
        let element = format!("{{ {mac} }}");
        let verb = if blocked { "add" } else { "delete" };

        match self
            .run(&[verb, "element", &cfg.family, &cfg.table, &cfg.block_set, &element])
            .await
        {
            Ok(_) => {
                info!(mac = %mac, blocked, "Updated block set");
                Ok(())
            }
            // Removing an address that is not in the set is already the wanted state
            Err(e) if !blocked && is_missing_object(&e) => {
                debug!(mac = %mac, "Address was not in block set");
                Ok(())
            }
            Err(e) => {
                warn!(mac = %mac, blocked, error = %e, "Failed to update block set");
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"nftables": [
        {"metainfo": {"version": "1.0.9", "release_name": "Old Doc Yak #3", "json_schema_version": 1}},
        {"counter": {"family": "inet", "name": "dt_aabbccddeeff", "table": "device_timer", "handle": 4, "packets": 812, "bytes": 1048576}}
    ]}"#;

    #[test]
    fn counter_name_strips_colons() {
        let host = NftablesHost::new(NftablesConfig::default());
        assert_eq!(host.counter_name("AA:bb:cc:dd:ee:ff"), "dt_aabbccddeeff");
    }

    #[test]
    fn parse_counter_output() {
        assert_eq!(parse_counter_bytes(SAMPLE, "dt_aabbccddeeff").unwrap(), 1048576);
    }

    #[test]
    fn missing_counter_is_parse_error() {
        let err = parse_counter_bytes(SAMPLE, "dt_000000000000").unwrap_err();
        assert!(matches!(err, HostError::Parse(_)));
    }

    #[test]
    fn garbage_output_is_parse_error() {
        assert!(matches!(
            parse_counter_bytes("not json", "dt_x"),
            Err(HostError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_marks_unhealthy() {
        let host = NftablesHost::new(NftablesConfig {
            nft_path: PathBuf::from("/nonexistent/nft"),
            ..Default::default()
        });

        let err = host.read_bytes("aa:bb:cc:dd:ee:ff").await.unwrap_err();
        assert!(matches!(err, HostError::Io(_)));
        assert!(!host.is_healthy());
    }
}
