//! Default paths for device-timer components
//!
//! The daemon normally runs as root on the gateway, so defaults live under
//! `/run`, `/var/lib` and `/etc`. Environment variables override the socket
//! and data locations for development and tests.

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const SOCKET_ENV: &str = "DEVICE_TIMER_SOCKET";

/// Environment variable for overriding the data directory
pub const DATA_DIR_ENV: &str = "DEVICE_TIMER_DATA_DIR";

/// Environment variable for overriding the config file
pub const CONFIG_ENV: &str = "DEVICE_TIMER_CONFIG";

const DEFAULT_SOCKET: &str = "/run/device-timer/device-timer.sock";
const DEFAULT_DATA_DIR: &str = "/var/lib/device-timer";
const DEFAULT_CONFIG: &str = "/etc/device-timer/config.toml";

fn env_or(var: &str, fallback: &str) -> PathBuf {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Socket path: `$DEVICE_TIMER_SOCKET`, else `/run/device-timer/device-timer.sock`.
pub fn default_socket_path() -> PathBuf {
    env_or(SOCKET_ENV, DEFAULT_SOCKET)
}

/// Data directory: `$DEVICE_TIMER_DATA_DIR`, else `/var/lib/device-timer`.
pub fn default_data_dir() -> PathBuf {
    env_or(DATA_DIR_ENV, DEFAULT_DATA_DIR)
}

/// Config file: `$DEVICE_TIMER_CONFIG`, else `/etc/device-timer/config.toml`.
pub fn default_config_path() -> PathBuf {
    env_or(CONFIG_ENV, DEFAULT_CONFIG)
}

/// Socket path used when the config file does not name one.
pub fn builtin_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET)
}

/// Data directory used when the config file does not name one.
pub fn builtin_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}
