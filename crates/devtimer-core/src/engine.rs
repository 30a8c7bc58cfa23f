//! Polling engine
//!
//! Once per poll interval the engine:
//! 1. rolls the usage day over when `reset_time` passes
//! 2. reads traffic counters and adds usage for devices that are in use
//! 3. evaluates every device and applies access changes to the gateway
//! 4. publishes an immutable [`StatusSnapshot`]

use chrono::{DateTime, Local, NaiveDate};
use devtimer_api::{DaemonStatus, DeviceState, DeviceView, StatusSnapshot};
use devtimer_config::{Device, Policy, Threshold};
use devtimer_host_api::HostAdapter;
use devtimer_store::{AuditEvent, AuditEventType, Store};
use devtimer_util::{DeviceId, usage_day};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{CalibrationManager, CoreEvent, Evaluation, bytes_per_minute, evaluate_detailed};

/// Usage rows older than this many days are pruned at rollover
pub const USAGE_RETENTION_DAYS: i64 = 30;

/// Upper bound for a single counter read during a tick
pub const DEFAULT_COUNTER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// The polling coordinator
pub struct CoreEngine {
    policy: Policy,
    store: Arc<dyn Store>,
    host: Arc<dyn HostAdapter>,
    calibration: Arc<CalibrationManager>,
    read_timeout: Duration,
    current_day: Option<NaiveDate>,
    last_counters: HashMap<DeviceId, u64>,
    last_states: HashMap<DeviceId, DeviceState>,
    /// Access decision last applied to the gateway
    enforced: HashMap<DeviceId, bool>,
    status_tx: watch::Sender<Arc<StatusSnapshot>>,
}

impl CoreEngine {
    pub fn new(
        policy: Policy,
        store: Arc<dyn Store>,
        host: Arc<dyn HostAdapter>,
        calibration: Arc<CalibrationManager>,
    ) -> Self {
        info!(
            device_count = policy.devices.len(),
            monitoring_enabled = policy.daemon.enabled,
            poll_interval_seconds = policy.daemon.poll_interval_seconds,
            "Core engine initialized"
        );

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::PolicyLoaded {
            device_count: policy.devices.len(),
        })) {
            warn!(error = %e, "Failed to write audit event");
        }

        let initial = StatusSnapshot {
            generated_at: devtimer_util::now(),
            daemon: DaemonStatus {
                running: true,
                monitoring_enabled: policy.daemon.enabled,
                poll_interval_seconds: policy.daemon.poll_interval_seconds,
                last_reset_date: store.get_last_reset_date().ok().flatten(),
                device_count: policy.devices.len(),
                active_calibrations: 0,
            },
            devices: Vec::new(),
        };
        let (status_tx, _) = watch::channel(Arc::new(initial));

        Self {
            policy,
            store,
            host,
            calibration,
            read_timeout: DEFAULT_COUNTER_READ_TIMEOUT,
            current_day: None,
            last_counters: HashMap::new(),
            last_states: HashMap::new(),
            enforced: HashMap::new(),
            status_tx,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn calibration(&self) -> &Arc<CalibrationManager> {
        &self.calibration
    }

    /// Receiver that always holds the latest published snapshot.
    pub fn subscribe_status(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.status_tx.subscribe()
    }

    pub fn current_status(&self) -> Arc<StatusSnapshot> {
        self.status_tx.borrow().clone()
    }

    /// Run one polling cycle at `now`.
    ///
    /// Windows are matched on the clock weekday while usage is read for the
    /// usage day, so a window that opens before `reset_time` spends the
    /// previous usage day's minutes.
    pub async fn tick(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        let day = usage_day(&now, self.policy.daemon.reset_time);
        self.roll_over(day, &mut events);

        let devices = self.policy.devices.clone();
        let mut views = Vec::with_capacity(devices.len());
        for device in &devices {
            views.push(self.tick_device(device, now, day, &mut events).await);
        }

        let snapshot = StatusSnapshot {
            generated_at: now,
            daemon: self.daemon_status(),
            devices: views,
        };
        self.status_tx.send_replace(Arc::new(snapshot));

        events
    }

    pub fn daemon_status(&self) -> DaemonStatus {
        DaemonStatus {
            running: true,
            monitoring_enabled: self.policy.daemon.enabled,
            poll_interval_seconds: self.policy.daemon.poll_interval_seconds,
            last_reset_date: self.current_day,
            device_count: self.policy.devices.len(),
            active_calibrations: self.calibration.running_count(),
        }
    }

    /// Threshold in force for `device`: calibrated override, then the
    /// device's configured value, then the daemon default.
    pub fn effective_threshold(&self, device: &Device) -> Threshold {
        let calibrated = match self.store.get_threshold_override(&device.id) {
            Ok(value) => value.map(Threshold::from_bytes),
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Failed to read threshold override");
                None
            }
        };

        calibrated
            .or(device.traffic_threshold)
            .unwrap_or(self.policy.daemon.default_threshold)
    }

    fn roll_over(&mut self, day: NaiveDate, events: &mut Vec<CoreEvent>) {
        if self.current_day == Some(day) {
            return;
        }

        let stored = match self.store.get_last_reset_date() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read last reset date");
                None
            }
        };
        self.current_day = Some(day);

        if stored == Some(day) {
            debug!(day = %day, "Resuming usage day");
            return;
        }

        info!(day = %day, previous = ?stored, "Usage day rolled over");
        if let Err(e) = self.store.set_last_reset_date(day) {
            warn!(error = %e, "Failed to save last reset date");
        }
        self.audit(AuditEventType::UsageDayRolledOver { day });

        let cutoff = day - chrono::Duration::days(USAGE_RETENTION_DAYS);
        match self.store.prune_usage_before(cutoff) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, cutoff = %cutoff, "Pruned old usage"),
            Err(e) => warn!(error = %e, "Failed to prune old usage"),
        }

        events.push(CoreEvent::UsageDayRolledOver { day });
    }

    async fn tick_device(
        &mut self,
        device: &Device,
        now: DateTime<Local>,
        day: NaiveDate,
        events: &mut Vec<CoreEvent>,
    ) -> DeviceView {
        let mut eval = self.evaluate(device, now, self.usage_minutes(device, day));

        if matches!(eval.state, DeviceState::Active | DeviceState::Unlimited) {
            if self.account_usage(device, day).await {
                eval = self.evaluate(device, now, self.usage_minutes(device, day));
            }
        } else {
            self.last_counters.remove(&device.id);
        }

        let previous = self.last_states.insert(device.id.clone(), eval.state);
        if previous != Some(eval.state) {
            info!(device_id = %device.id, from = ?previous, to = %eval.state, "Device state changed");
            self.audit(AuditEventType::DeviceStateChanged {
                device_id: device.id.clone(),
                from: previous,
                to: eval.state,
            });
            events.push(CoreEvent::DeviceStateChanged {
                device_id: device.id.clone(),
                from: previous,
                to: eval.state,
            });
        }

        self.enforce(device, eval.state.denies_access(), events).await;

        DeviceView {
            id: device.id.clone(),
            name: device.name.clone(),
            mac: device.mac.clone(),
            enabled: device.enabled && self.policy.daemon.enabled,
            status: eval.state,
            usage_minutes: self.usage_minutes(device, day),
            todays_limit: eval.limit_minutes,
            remaining_minutes: eval.remaining_minutes,
            has_schedule_today: eval.has_schedule_today,
            in_time_window: eval.in_time_window(),
            traffic_threshold: self.effective_threshold(device).to_string(),
        }
    }

    fn evaluate(&self, device: &Device, now: DateTime<Local>, usage_minutes: u32) -> Evaluation {
        if self.policy.daemon.enabled {
            evaluate_detailed(&now, device, usage_minutes)
        } else {
            let disabled = Device {
                enabled: false,
                ..device.clone()
            };
            evaluate_detailed(&now, &disabled, usage_minutes)
        }
    }

    fn usage_minutes(&self, device: &Device, day: NaiveDate) -> u32 {
        match self.store.get_usage(&device.id, day) {
            Ok(used) => u32::try_from(used.as_secs() / 60).unwrap_or(u32::MAX),
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Failed to read usage");
                0
            }
        }
    }

    /// Read the device counter and count the interval as used when the
    /// byte rate reaches the threshold. Returns whether usage was added.
    async fn account_usage(&mut self, device: &Device, day: NaiveDate) -> bool {
        let read = tokio::time::timeout(self.read_timeout, self.host.read_bytes(&device.mac)).await;
        let counter = match read {
            Ok(Ok(counter)) => counter,
            Ok(Err(e)) => {
                warn!(device_id = %device.id, error = %e, "Failed to read traffic counter");
                self.last_counters.remove(&device.id);
                return false;
            }
            Err(_) => {
                warn!(device_id = %device.id, timeout = ?self.read_timeout, "Traffic counter read timed out");
                self.last_counters.remove(&device.id);
                return false;
            }
        };

        let Some(previous) = self.last_counters.insert(device.id.clone(), counter) else {
            return false;
        };

        let interval = u64::from(self.policy.daemon.poll_interval_seconds);
        let rate = bytes_per_minute(previous, counter, interval);
        let threshold = self.effective_threshold(device);
        if rate < threshold.bytes() {
            debug!(device_id = %device.id, rate, threshold = %threshold, "Below usage threshold");
            return false;
        }

        match self.store.add_usage(&device.id, day, Duration::from_secs(interval)) {
            Ok(()) => {
                debug!(device_id = %device.id, rate, threshold = %threshold, "Usage counted");
                true
            }
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Failed to record usage");
                false
            }
        }
    }

    /// Push an access decision to the gateway when it differs from the
    /// last one applied. Failures are retried on the next tick.
    async fn enforce(&mut self, device: &Device, blocked: bool, events: &mut Vec<CoreEvent>) {
        if self.enforced.get(&device.id) == Some(&blocked) {
            return;
        }

        match self.host.set_blocked(&device.mac, blocked).await {
            Ok(()) => {
                self.enforced.insert(device.id.clone(), blocked);
                self.audit(AuditEventType::AccessChanged {
                    device_id: device.id.clone(),
                    blocked,
                });
                events.push(CoreEvent::AccessChanged {
                    device_id: device.id.clone(),
                    blocked,
                });
            }
            Err(e) => {
                warn!(device_id = %device.id, blocked, error = %e, "Failed to apply access decision");
            }
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }
}
