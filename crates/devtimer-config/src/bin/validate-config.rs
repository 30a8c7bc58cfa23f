//! Config validation CLI tool
//!
//! Validates a device-timer configuration file and reports any errors.

use devtimer_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a device-timer configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match devtimer_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", devtimer_config::CURRENT_CONFIG_VERSION);
            println!(
                "  Monitoring: {}",
                if policy.daemon.enabled { "enabled" } else { "disabled" }
            );
            println!("  Poll interval: {}s", policy.daemon.poll_interval_seconds);
            println!("  Default threshold: {}", policy.daemon.default_threshold);
            println!("  Usage day starts: {}", policy.daemon.reset_time.format("%H:%M"));
            println!("  Devices: {}", policy.devices.len());

            if !policy.devices.is_empty() {
                println!();
                println!("Devices:");
                for device in &policy.devices {
                    let threshold = device
                        .traffic_threshold
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "default".into());
                    println!(
                        "  - {} [{}, threshold {}]: {}{}",
                        device.id,
                        device.mac,
                        threshold,
                        device.name,
                        if device.enabled { "" } else { " (disabled)" }
                    );
                    for entry in &device.schedule {
                        println!("      {entry}");
                    }
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                devtimer_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                devtimer_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                devtimer_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                devtimer_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        devtimer_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
