//! Configuration validation

use crate::schedule::{ScheduleError, parse_clock, validate_schedule};
use crate::schema::{RawConfig, RawDevice};
use crate::threshold::Threshold;
use chrono::NaiveTime;
use std::collections::HashSet;
use thiserror::Error;

pub const MIN_POLL_INTERVAL_SECONDS: u32 = 10;
pub const MAX_POLL_INTERVAL_SECONDS: u32 = 300;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u32 = 60;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Device '{device_id}': {message}")]
    DeviceError { device_id: String, message: String },

    #[error("Device '{device_id}': {source}")]
    InvalidSchedule {
        device_id: String,
        #[source]
        source: ScheduleError,
    },

    #[error("Duplicate device ID: {0}")]
    DuplicateDeviceId(String),

    #[error("Duplicate MAC address: {0}")]
    DuplicateMac(String),

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("poll_interval_seconds {0} out of range (10..=300)")]
    PollIntervalOutOfRange(u32),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(secs) = config.daemon.poll_interval_seconds {
        if !poll_interval_in_range(secs) {
            errors.push(ValidationError::PollIntervalOutOfRange(secs));
        }
    }

    if let Some(value) = &config.daemon.default_threshold {
        if let Err(e) = value.parse::<Threshold>() {
            errors.push(ValidationError::GlobalError(format!("default_threshold: {e}")));
        }
    }

    if let Some(value) = &config.daemon.reset_time {
        if let Err(e) = parse_time(value) {
            errors.push(e);
        }
    }

    let mut seen_ids = HashSet::new();
    let mut seen_macs = HashSet::new();
    for device in &config.devices {
        if !seen_ids.insert(device.id.as_str()) {
            errors.push(ValidationError::DuplicateDeviceId(device.id.clone()));
        }
        if let Some(mac) = normalize_mac(&device.mac) {
            if !seen_macs.insert(mac.clone()) {
                errors.push(ValidationError::DuplicateMac(mac));
            }
        }
    }

    for device in &config.devices {
        errors.extend(validate_device(device));
    }

    errors
}

fn validate_device(device: &RawDevice) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let device_error = |message: String| ValidationError::DeviceError {
        device_id: device.id.clone(),
        message,
    };

    if device.id.trim().is_empty() {
        errors.push(device_error("id cannot be empty".into()));
    }
    if device.name.trim().is_empty() {
        errors.push(device_error("name cannot be empty".into()));
    }
    if normalize_mac(&device.mac).is_none() {
        errors.push(device_error(format!(
            "invalid MAC address '{}', expected aa:bb:cc:dd:ee:ff",
            device.mac
        )));
    }
    if let Some(value) = &device.traffic_threshold {
        if let Err(e) = value.parse::<Threshold>() {
            errors.push(device_error(e.to_string()));
        }
    }
    if let Err(source) = validate_schedule(&device.schedule) {
        errors.push(ValidationError::InvalidSchedule {
            device_id: device.id.clone(),
            source,
        });
    }

    errors
}

pub fn poll_interval_in_range(secs: u32) -> bool {
    (MIN_POLL_INTERVAL_SECONDS..=MAX_POLL_INTERVAL_SECONDS).contains(&secs)
}

/// Parse `HH:MM` (hour may be a single digit) into a wall-clock time.
pub fn parse_time(s: &str) -> Result<NaiveTime, ValidationError> {
    let minute = parse_clock(s).ok_or_else(|| ValidationError::InvalidTimeFormat {
        value: s.to_string(),
        message: "expected HH:MM".into(),
    })?;

    NaiveTime::from_hms_opt(u32::from(minute / 60), u32::from(minute % 60), 0).ok_or_else(|| {
        ValidationError::InvalidTimeFormat {
            value: s.to_string(),
            message: "time out of range".into(),
        }
    })
}

/// Lowercase a colon-separated six-octet MAC, or `None` if malformed.
pub fn normalize_mac(s: &str) -> Option<String> {
    let octets: Vec<&str> = s.split(':').collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.bytes().all(|b| b.is_ascii_hexdigit()));
    well_formed.then(|| s.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawDaemonConfig;

    fn device(id: &str, mac: &str, schedule: &[&str]) -> RawDevice {
        RawDevice {
            id: id.into(),
            name: format!("Device {id}"),
            mac: mac.into(),
            enabled: true,
            traffic_threshold: None,
            schedule: schedule.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn config(devices: Vec<RawDevice>) -> RawConfig {
        RawConfig {
            config_version: 1,
            daemon: RawDaemonConfig::default(),
            devices,
        }
    }

    #[test]
    fn valid_config_has_no_errors() {
        let cfg = config(vec![
            device("tv", "aa:bb:cc:dd:ee:01", &["Mon,18:00-21:00,90"]),
            device("console", "AA:BB:CC:DD:EE:02", &["Sat,22:00-02:00,0"]),
        ]);
        assert!(validate_config(&cfg).is_empty());
    }

    #[test]
    fn duplicate_ids_and_macs_are_reported() {
        let cfg = config(vec![
            device("tv", "aa:bb:cc:dd:ee:01", &[]),
            device("tv", "AA:BB:CC:DD:EE:01", &[]),
        ]);
        let errors = validate_config(&cfg);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DuplicateDeviceId(id) if id == "tv")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DuplicateMac(m) if m == "aa:bb:cc:dd:ee:01")));
    }

    #[test]
    fn overlapping_schedule_is_reported() {
        let cfg = config(vec![device(
            "tablet",
            "aa:bb:cc:dd:ee:03",
            &["Mon,22:00-02:00,30", "Mon,01:00-03:00,0"],
        )]);
        let errors = validate_config(&cfg);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ValidationError::InvalidSchedule { source: ScheduleError::Conflict { .. }, .. }
        ));
    }

    #[test]
    fn errors_are_collected_not_short_circuited() {
        let mut bad = device("", "not-a-mac", &["Funday,10:00-11:00,5"]);
        bad.name = " ".into();
        bad.traffic_threshold = Some("lots".into());
        let mut cfg = config(vec![bad]);
        cfg.daemon.poll_interval_seconds = Some(5);
        cfg.daemon.reset_time = Some("25:00".into());
        cfg.daemon.default_threshold = Some("6G".into());

        let errors = validate_config(&cfg);
        assert_eq!(errors.len(), 8, "{errors:#?}");
    }

    #[test]
    fn poll_interval_bounds() {
        assert!(!poll_interval_in_range(9));
        assert!(poll_interval_in_range(10));
        assert!(poll_interval_in_range(300));
        assert!(!poll_interval_in_range(301));
    }

    #[test]
    fn parse_reset_time() {
        assert_eq!(parse_time("04:30").unwrap(), NaiveTime::from_hms_opt(4, 30, 0).unwrap());
        assert_eq!(parse_time("4:30").unwrap(), NaiveTime::from_hms_opt(4, 30, 0).unwrap());
        assert!(parse_time("4:3").is_err());
        assert!(parse_time("24:00").is_err());
    }

    #[test]
    fn mac_normalization() {
        assert_eq!(normalize_mac("AA:bb:0C:dd:ee:FF").as_deref(), Some("aa:bb:0c:dd:ee:ff"));
        assert!(normalize_mac("aa-bb-cc-dd-ee-ff").is_none());
        assert!(normalize_mac("aa:bb:cc:dd:ee").is_none());
        assert!(normalize_mac("aa:bb:cc:dd:ee:fg").is_none());
    }
}
