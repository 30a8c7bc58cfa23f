//! Command dispatch for IPC requests

use devtimer_api::{
    AuditEntry, ClientRole, Command, ErrorCode, ErrorInfo, HealthStatus, Response, ResponsePayload,
};
use devtimer_config::{Device, ScheduleError, validate_schedule};
use devtimer_core::{CalibrationError, CalibrationParams, CoreEngine};
use devtimer_host_api::HostAdapter;
use devtimer_store::Store;
use devtimer_util::{ClientId, DeviceId};
use tracing::debug;

/// Upper bound on rows returned by one audit log request
pub const MAX_AUDIT_ENTRIES: usize = 500;

/// Everything a command needs to see
pub struct CommandContext<'a> {
    pub engine: &'a CoreEngine,
    pub store: &'a dyn Store,
    pub host: &'a dyn HostAdapter,
}

pub fn handle_command(
    ctx: &CommandContext<'_>,
    client_id: &ClientId,
    role: ClientRole,
    request_id: u64,
    command: Command,
) -> Response {
    debug!(client_id = %client_id, request_id, command = ?command, "Handling command");

    match dispatch(ctx, client_id, role, command) {
        Ok(payload) => Response::success(request_id, payload),
        Err(error) => Response::error(request_id, error),
    }
}

fn dispatch(
    ctx: &CommandContext<'_>,
    client_id: &ClientId,
    role: ClientRole,
    command: Command,
) -> Result<ResponsePayload, ErrorInfo> {
    let calibration = ctx.engine.calibration();

    match command {
        Command::ListDevices => Ok(ResponsePayload::Devices {
            devices: ctx.engine.current_status().devices.clone(),
        }),

        Command::GetDaemonStatus => Ok(ResponsePayload::DaemonStatus(ctx.engine.daemon_status())),

        Command::StartCalibration {
            device_id,
            duration_seconds,
            sample_interval_seconds,
        } => {
            require_admin(role)?;
            let device = find_device(ctx, &device_id)?;
            let params = CalibrationParams::new(duration_seconds, sample_interval_seconds)
                .map_err(calibration_error)?;
            let snapshot = calibration.start(device, params).map_err(calibration_error)?;
            Ok(ResponsePayload::CalibrationStarted(snapshot))
        }

        Command::GetCalibration { device_id } => {
            find_device(ctx, &device_id)?;
            Ok(ResponsePayload::Calibration(calibration.get(&device_id)))
        }

        Command::ApplyCalibration { device_id } => {
            require_admin(role)?;
            find_device(ctx, &device_id)?;
            let threshold = calibration.apply(&device_id).map_err(calibration_error)?;
            Ok(ResponsePayload::CalibrationApplied {
                threshold: threshold.to_string(),
            })
        }

        Command::CancelCalibration { device_id } => {
            require_admin(role)?;
            find_device(ctx, &device_id)?;
            calibration.cancel(&device_id).map_err(calibration_error)?;
            Ok(ResponsePayload::CalibrationCancelled)
        }

        Command::ValidateSchedule { entries } => match validate_schedule(&entries) {
            Ok(parsed) => Ok(ResponsePayload::ScheduleValid {
                entry_count: parsed.len(),
            }),
            Err(e @ ScheduleError::Format { .. }) => {
                Err(ErrorInfo::new(ErrorCode::InvalidFormat, e.to_string()))
            }
            Err(e @ ScheduleError::Conflict { .. }) => {
                Err(ErrorInfo::new(ErrorCode::ScheduleConflict, e.to_string()))
            }
        },

        Command::GetAuditLog { limit } => {
            let events = ctx
                .store
                .get_recent_audits(limit.min(MAX_AUDIT_ENTRIES))
                .map_err(|e| ErrorInfo::new(ErrorCode::StoreError, e.to_string()))?;
            let entries = events
                .into_iter()
                .map(|e| {
                    serde_json::to_value(&e.event).map(|event| AuditEntry {
                        id: e.id,
                        timestamp: e.timestamp,
                        event,
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ErrorInfo::new(ErrorCode::InternalError, e.to_string()))?;
            Ok(ResponsePayload::AuditLog { entries })
        }

        // The IPC layer already flipped the subscription flag
        Command::SubscribeEvents => Ok(ResponsePayload::Subscribed {
            client_id: client_id.clone(),
        }),

        Command::UnsubscribeEvents => Ok(ResponsePayload::Unsubscribed),

        Command::GetHealth => {
            let store_ok = ctx.store.is_healthy();
            let host_ok = ctx.host.is_healthy();
            Ok(ResponsePayload::Health(HealthStatus {
                live: true,
                ready: store_ok && host_ok,
                store_ok,
                host_ok,
            }))
        }

        Command::Ping => Ok(ResponsePayload::Pong),
    }
}

fn require_admin(role: ClientRole) -> Result<(), ErrorInfo> {
    if role.can_manage_calibration() {
        Ok(())
    } else {
        Err(ErrorInfo::new(
            ErrorCode::PermissionDenied,
            "Only administrators may manage calibrations",
        ))
    }
}

fn find_device<'a>(ctx: &CommandContext<'a>, device_id: &DeviceId) -> Result<&'a Device, ErrorInfo> {
    ctx.engine.policy().get_device(device_id).ok_or_else(|| {
        ErrorInfo::new(
            ErrorCode::DeviceNotFound,
            format!("Unknown device '{device_id}'"),
        )
    })
}

fn calibration_error(error: CalibrationError) -> ErrorInfo {
    let code = match &error {
        CalibrationError::SessionBusy(_) => ErrorCode::SessionBusy,
        CalibrationError::InvalidState { .. } => ErrorCode::InvalidSessionState,
        CalibrationError::InvalidParameters(_) => ErrorCode::InvalidRequest,
        CalibrationError::Store(_) => ErrorCode::StoreError,
    };
    ErrorInfo::new(code, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devtimer_api::{CalibrationStatus, ResponseResult};
    use devtimer_config::parse_config;
    use devtimer_core::CalibrationManager;
    use devtimer_host_api::MockHost;
    use devtimer_store::SqliteStore;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const CONSOLE: &str = "aa:bb:cc:dd:ee:10";

    struct Fixture {
        host: Arc<MockHost>,
        store: Arc<SqliteStore>,
        engine: CoreEngine,
        client: ClientId,
    }

    impl Fixture {
        fn new() -> Self {
            let policy = parse_config(&format!(
                r#"
                config_version = 1

                [[devices]]
                id = "console"
                name = "Console"
                mac = "{CONSOLE}"
                schedule = ["Sat,09:00-12:00,90"]
                "#
            ))
            .unwrap();

            let host = Arc::new(MockHost::new());
            host.set_counter(CONSOLE, 0);
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            let (tx, _rx) = mpsc::unbounded_channel();
            let calibration = Arc::new(CalibrationManager::new(host.clone(), store.clone(), tx));
            let engine = CoreEngine::new(policy, store.clone(), host.clone(), calibration);

            Self {
                host,
                store,
                engine,
                client: ClientId::new(),
            }
        }

        fn run(&self, role: ClientRole, command: Command) -> ResponseResult {
            let ctx = CommandContext {
                engine: &self.engine,
                store: self.store.as_ref(),
                host: self.host.as_ref(),
            };
            handle_command(&ctx, &self.client, role, 1, command).result
        }
    }

    fn error_code(result: ResponseResult) -> ErrorCode {
        match result {
            ResponseResult::Err(e) => e.code,
            ResponseResult::Ok(payload) => panic!("expected error, got {payload:?}"),
        }
    }

    fn start(device: &str) -> Command {
        Command::StartCalibration {
            device_id: DeviceId::new(device),
            duration_seconds: 600,
            sample_interval_seconds: 60,
        }
    }

    #[tokio::test]
    async fn observers_cannot_start_calibration() {
        let f = Fixture::new();
        assert_eq!(
            error_code(f.run(ClientRole::Observer, start("console"))),
            ErrorCode::PermissionDenied
        );
        assert_eq!(f.engine.calibration().running_count(), 0);
    }

    #[tokio::test]
    async fn unknown_device_is_reported() {
        let f = Fixture::new();
        assert_eq!(
            error_code(f.run(ClientRole::Admin, start("fridge"))),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(
            error_code(f.run(
                ClientRole::Observer,
                Command::GetCalibration {
                    device_id: DeviceId::new("fridge")
                }
            )),
            ErrorCode::DeviceNotFound
        );
    }

    #[tokio::test]
    async fn second_start_is_busy() {
        let f = Fixture::new();
        let first = f.run(ClientRole::Admin, start("console"));
        assert!(matches!(
            first,
            ResponseResult::Ok(ResponsePayload::CalibrationStarted(ref s)) if s.status == CalibrationStatus::Running
        ));

        assert_eq!(
            error_code(f.run(ClientRole::Admin, start("console"))),
            ErrorCode::SessionBusy
        );

        let cancel = f.run(
            ClientRole::Admin,
            Command::CancelCalibration {
                device_id: DeviceId::new("console"),
            },
        );
        assert!(matches!(cancel, ResponseResult::Ok(ResponsePayload::CalibrationCancelled)));
    }

    #[tokio::test]
    async fn bad_parameters_are_invalid_requests() {
        let f = Fixture::new();
        let command = Command::StartCalibration {
            device_id: DeviceId::new("console"),
            duration_seconds: 30,
            sample_interval_seconds: 60,
        };
        assert_eq!(error_code(f.run(ClientRole::Admin, command)), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn apply_without_result_is_invalid_state() {
        let f = Fixture::new();
        let command = Command::ApplyCalibration {
            device_id: DeviceId::new("console"),
        };
        assert_eq!(
            error_code(f.run(ClientRole::Admin, command)),
            ErrorCode::InvalidSessionState
        );
    }

    #[tokio::test]
    async fn schedule_validation_codes() {
        let f = Fixture::new();

        let ok = f.run(
            ClientRole::Observer,
            Command::ValidateSchedule {
                entries: vec!["Mon,22:00-02:00,30".into(), "Tue,08:00-09:00,0".into()],
            },
        );
        assert!(matches!(
            ok,
            ResponseResult::Ok(ResponsePayload::ScheduleValid { entry_count: 2 })
        ));

        let malformed = f.run(
            ClientRole::Observer,
            Command::ValidateSchedule {
                entries: vec!["Monday,22:00-02:00,30".into()],
            },
        );
        assert_eq!(error_code(malformed), ErrorCode::InvalidFormat);

        let overlapping = f.run(
            ClientRole::Observer,
            Command::ValidateSchedule {
                entries: vec!["Mon,22:00-02:00,30".into(), "Mon,01:00-03:00,0".into()],
            },
        );
        assert_eq!(error_code(overlapping), ErrorCode::ScheduleConflict);
    }

    #[tokio::test]
    async fn health_reflects_collaborators() {
        let f = Fixture::new();
        match f.run(ClientRole::Observer, Command::GetHealth) {
            ResponseResult::Ok(ResponsePayload::Health(h)) => {
                assert!(h.live);
                assert!(h.ready);
                assert!(h.store_ok);
                assert!(h.host_ok);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn daemon_status_counts_devices() {
        let f = Fixture::new();
        match f.run(ClientRole::Observer, Command::GetDaemonStatus) {
            ResponseResult::Ok(ResponsePayload::DaemonStatus(status)) => {
                assert!(status.running);
                assert_eq!(status.device_count, 1);
                assert_eq!(status.poll_interval_seconds, 60);
                assert_eq!(status.active_calibrations, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn audit_log_is_newest_first_and_limited() {
        let f = Fixture::new();
        assert!(matches!(
            f.run(ClientRole::Admin, start("console")),
            ResponseResult::Ok(ResponsePayload::CalibrationStarted(_))
        ));

        match f.run(ClientRole::Observer, Command::GetAuditLog { limit: 1 }) {
            ResponseResult::Ok(ResponsePayload::AuditLog { entries }) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].event["type"], "calibration_started");
                assert_eq!(entries[0].event["device_id"], "console");
            }
            other => panic!("unexpected {other:?}"),
        }

        match f.run(ClientRole::Observer, Command::GetAuditLog { limit: 10 }) {
            ResponseResult::Ok(ResponsePayload::AuditLog { entries }) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[1].event["type"], "policy_loaded");
                assert!(entries[0].id > entries[1].id);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
