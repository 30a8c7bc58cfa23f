//! devtimerctl - administrative client for devtimerd

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use devtimer_api::{
    CalibrationSnapshot, Command, DaemonStatus, DeviceView, EventPayload, ResponsePayload,
    ResponseResult,
};
use devtimer_ipc::IpcClient;
use devtimer_util::{DeviceId, default_socket_path};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "devtimerctl", version, about = "Control the device-timer daemon")]
struct Cli {
    /// Socket path (or set DEVICE_TIMER_SOCKET env var)
    #[arg(short, long, env = "DEVICE_TIMER_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Print raw JSON payloads
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices with state and today's usage
    Devices,
    /// Show daemon status
    Status,
    /// Calibration session control
    Calibrate {
        #[command(subcommand)]
        action: CalibrateAction,
    },
    /// Check schedule entries such as "Mon,14:00-18:00,60"
    ValidateSchedule {
        #[arg(required = true)]
        entries: Vec<String>,
    },
    /// Stream daemon events until interrupted
    Watch,
    /// Show store and gateway health
    Health,
    /// Show recent audit log entries, newest first
    Audit {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum CalibrateAction {
    /// Start measuring a device's idle traffic
    Start {
        device_id: String,
        /// Total sampling time in seconds
        #[arg(long, default_value = "1800")]
        duration: u64,
        /// Seconds between samples
        #[arg(long, default_value = "10")]
        interval: u64,
    },
    /// Show session progress and results
    Get { device_id: String },
    /// Save the recommended threshold of a completed session
    Apply { device_id: String },
    /// Stop a running session
    Cancel { device_id: String },
}

impl CalibrateAction {
    fn into_command(self) -> Command {
        match self {
            CalibrateAction::Start {
                device_id,
                duration,
                interval,
            } => Command::StartCalibration {
                device_id: DeviceId::new(device_id),
                duration_seconds: duration,
                sample_interval_seconds: interval,
            },
            CalibrateAction::Get { device_id } => Command::GetCalibration {
                device_id: DeviceId::new(device_id),
            },
            CalibrateAction::Apply { device_id } => Command::ApplyCalibration {
                device_id: DeviceId::new(device_id),
            },
            CalibrateAction::Cancel { device_id } => Command::CancelCalibration {
                device_id: DeviceId::new(device_id),
            },
        }
    }
}

async fn request(socket: &Path, command: Command) -> Result<ResponsePayload> {
    let mut client = IpcClient::connect(socket)
        .await
        .with_context(|| format!("Failed to connect to {}", socket.display()))?;

    match client.send(command).await?.result {
        ResponseResult::Ok(payload) => Ok(payload),
        ResponseResult::Err(e) => bail!("{:?}: {}", e.code, e.message),
    }
}

async fn watch(socket: &Path, json: bool) -> Result<()> {
    let client = IpcClient::connect(socket)
        .await
        .with_context(|| format!("Failed to connect to {}", socket.display()))?;
    let mut stream = client.subscribe().await?;

    loop {
        let event = stream.next().await?;
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }

        let time = event.timestamp.format("%H:%M:%S");
        match event.payload {
            EventPayload::StatusUpdated(snapshot) => {
                println!("[{time}] status: {} devices", snapshot.devices.len());
                for device in &snapshot.devices {
                    print_device(device);
                }
            }
            EventPayload::CalibrationChanged(snapshot) => {
                println!("[{time}] calibration:");
                print_calibration(&snapshot);
            }
            EventPayload::UsageDayRolledOver { day } => {
                println!("[{time}] usage day rolled over to {day}");
            }
            EventPayload::Shutdown => {
                println!("[{time}] daemon shutting down");
                return Ok(());
            }
        }
    }
}

fn print_device(d: &DeviceView) {
    let remaining = match (d.remaining_minutes, d.todays_limit) {
        (Some(left), Some(limit)) => format!("{left}/{limit} min left"),
        _ => "-".to_string(),
    };
    println!(
        "  {:<16} {:<17} {:<15} used {:>4} min  {:<16} threshold {}",
        d.id.as_str(), d.mac, d.status.as_str(), d.usage_minutes, remaining, d.traffic_threshold
    );
}

fn print_status(s: &DaemonStatus) {
    println!("running:             {}", s.running);
    println!("monitoring enabled:  {}", s.monitoring_enabled);
    println!("poll interval:       {}s", s.poll_interval_seconds);
    match s.last_reset_date {
        Some(day) => println!("usage day:           {day}"),
        None => println!("usage day:           -"),
    }
    println!("devices:             {}", s.device_count);
    println!("active calibrations: {}", s.active_calibrations);
}

fn print_calibration(c: &CalibrationSnapshot) {
    println!("  device:   {}", c.device_id);
    println!("  status:   {}", c.status);
    if c.duration_seconds > 0 {
        println!(
            "  progress: {}% ({}/{}s, {} samples every {}s)",
            c.progress_percent,
            c.elapsed_seconds,
            c.duration_seconds,
            c.sample_count,
            c.sample_interval_seconds
        );
    }
    if let Some(p90) = c.result_p90 {
        println!("  p90:      {p90} B/min");
    }
    if let Some(threshold) = &c.recommended_threshold {
        println!("  recommended threshold: {threshold}");
    }
    if let Some(message) = &c.error_message {
        println!("  error:    {message}");
    }
}

fn print_payload(payload: &ResponsePayload) {
    match payload {
        ResponsePayload::Devices { devices } => {
            if devices.is_empty() {
                println!("No device status yet");
            }
            for device in devices {
                print_device(device);
            }
        }
        ResponsePayload::DaemonStatus(status) => print_status(status),
        ResponsePayload::CalibrationStarted(snapshot) | ResponsePayload::Calibration(snapshot) => {
            print_calibration(snapshot)
        }
        ResponsePayload::CalibrationApplied { threshold } => {
            println!("Applied threshold {threshold}");
        }
        ResponsePayload::CalibrationCancelled => println!("Calibration cancelled"),
        ResponsePayload::ScheduleValid { entry_count } => {
            println!("Schedule valid ({entry_count} entries)");
        }
        ResponsePayload::AuditLog { entries } => {
            for entry in entries {
                let kind = entry.event["type"].as_str().unwrap_or("unknown");
                println!(
                    "{}  {:<24} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    kind,
                    entry.event
                );
            }
        }
        ResponsePayload::Health(health) => {
            println!("live:  {}", health.live);
            println!("ready: {}", health.ready);
            println!("store: {}", if health.store_ok { "ok" } else { "failing" });
            println!("host:  {}", if health.host_ok { "ok" } else { "failing" });
        }
        ResponsePayload::Subscribed { .. } | ResponsePayload::Unsubscribed | ResponsePayload::Pong => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Devices => Command::ListDevices,
        Commands::Status => Command::GetDaemonStatus,
        Commands::Calibrate { action } => action.into_command(),
        Commands::ValidateSchedule { entries } => Command::ValidateSchedule { entries },
        Commands::Health => Command::GetHealth,
        Commands::Audit { limit } => Command::GetAuditLog { limit },
        Commands::Watch => return watch(&cli.socket, cli.json).await,
    };

    let payload = request(&cli.socket, command).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_payload(&payload);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrate_start_defaults() {
        let cli = Cli::try_parse_from(["devtimerctl", "calibrate", "start", "tv"]).unwrap();
        let Commands::Calibrate { action } = cli.command else {
            panic!("expected calibrate");
        };
        assert!(matches!(
            action.into_command(),
            Command::StartCalibration {
                duration_seconds: 1800,
                sample_interval_seconds: 10,
                ..
            }
        ));
    }

    #[test]
    fn validate_schedule_requires_entries() {
        assert!(Cli::try_parse_from(["devtimerctl", "validate-schedule"]).is_err());

        let cli = Cli::try_parse_from([
            "devtimerctl",
            "--socket",
            "/tmp/dt.sock",
            "validate-schedule",
            "Mon,14:00-18:00,60",
        ])
        .unwrap();
        assert_eq!(cli.socket, PathBuf::from("/tmp/dt.sock"));
        assert!(matches!(cli.command, Commands::ValidateSchedule { ref entries } if entries.len() == 1));
    }

    #[test]
    fn audit_defaults_to_twenty_entries() {
        let cli = Cli::try_parse_from(["devtimerctl", "audit"]).unwrap();
        assert!(matches!(cli.command, Commands::Audit { limit: 20 }));
    }
}
