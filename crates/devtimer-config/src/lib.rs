//! Configuration parsing and validation for device-timer
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Per-device weekly schedules with daily minute limits
//! - Traffic thresholds that decide when a device counts as in use
//! - Validation with clear error messages

mod policy;
mod schedule;
mod schema;
mod threshold;
mod validation;

pub use policy::*;
pub use schedule::*;
pub use schema::*;
pub use threshold::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Policy::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_minimal_config() {
        let config = r#"
            config_version = 1

            [[devices]]
            id = "laptop"
            name = "Laptop"
            mac = "00:11:22:33:44:55"
        "#;

        let policy = parse_config(config).unwrap();
        assert_eq!(policy.devices.len(), 1);
        assert_eq!(policy.devices[0].id.as_str(), "laptop");
        assert!(policy.devices[0].enabled);
        assert!(policy.devices[0].schedule.is_empty());
    }

    #[test]
    fn parse_full_daemon_section() {
        let config = r#"
            config_version = 1

            [daemon]
            enabled = false
            poll_interval_seconds = 30
            default_threshold = "2M"
            reset_time = "04:00"
            socket_path = "/tmp/dt.sock"
            data_dir = "/tmp/dt"
        "#;

        let policy = parse_config(config).unwrap();
        assert!(!policy.daemon.enabled);
        assert_eq!(policy.daemon.poll_interval_seconds, 30);
        assert_eq!(policy.daemon.default_threshold.to_string(), "2M");
        assert_eq!(policy.daemon.reset_time.to_string(), "04:00:00");
        assert_eq!(policy.daemon.socket_path, Path::new("/tmp/dt.sock"));
    }

    #[test]
    fn reject_wrong_version() {
        let config = r#"
            config_version = 99
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_overlapping_schedule() {
        let config = r#"
            config_version = 1

            [[devices]]
            id = "tablet"
            name = "Tablet"
            mac = "00:11:22:33:44:66"
            schedule = ["Fri,20:00-23:00,60", "Fri,22:00-23:30,0"]
        "#;

        let Err(ConfigError::ValidationFailed { errors }) = parse_config(config) else {
            panic!("expected validation failure");
        };
        assert_eq!(
            errors[0].to_string(),
            "Device 'tablet': Overlapping schedules on Fri: Fri,20:00-23:00,60 and Fri,22:00-23:30,0"
        );
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "config_version = 1").unwrap();

        let policy = load_config(file.path()).unwrap();
        assert!(policy.devices.is_empty());
    }
}
