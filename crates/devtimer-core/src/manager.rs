//! Calibration manager: one sampling task per running session

use devtimer_api::CalibrationSnapshot;
use devtimer_config::{Device, Threshold};
use devtimer_host_api::HostAdapter;
use devtimer_store::{AuditEvent, AuditEventType, Store};
use devtimer_util::DeviceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{CalibrationError, CalibrationParams, CalibrationSession, CoreEvent, SampleOutcome};

/// Upper bound for a single counter read during calibration
pub const DEFAULT_SAMPLE_READ_TIMEOUT: Duration = Duration::from_secs(5);

struct Slot {
    session: CalibrationSession,
    cancel: Option<CancellationToken>,
}

type SharedSlot = Arc<Mutex<Slot>>;

/// Owns every device's calibration session.
///
/// Each session sits behind its own mutex; start, cancel, apply and each
/// sample commit take it, so two starts on one device cannot both win.
pub struct CalibrationManager {
    host: Arc<dyn HostAdapter>,
    store: Arc<dyn Store>,
    events: mpsc::UnboundedSender<CoreEvent>,
    read_timeout: Duration,
    slots: Mutex<HashMap<DeviceId, SharedSlot>>,
}

impl CalibrationManager {
    pub fn new(
        host: Arc<dyn HostAdapter>,
        store: Arc<dyn Store>,
        events: mpsc::UnboundedSender<CoreEvent>,
    ) -> Self {
        Self {
            host,
            store,
            events,
            read_timeout: DEFAULT_SAMPLE_READ_TIMEOUT,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn slot(&self, device_id: &DeviceId) -> SharedSlot {
        self.slots
            .lock()
            .entry(device_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    session: CalibrationSession::new(device_id.clone()),
                    cancel: None,
                }))
            })
            .clone()
    }

    /// Start sampling `device`; must be called from within a tokio runtime.
    pub fn start(
        &self,
        device: &Device,
        params: CalibrationParams,
    ) -> Result<CalibrationSnapshot, CalibrationError> {
        let slot = self.slot(&device.id);
        let mut guard = slot.lock();

        let generation = guard.session.start(params, devtimer_util::now())?;
        let cancel = CancellationToken::new();
        guard.cancel = Some(cancel.clone());
        let snapshot = guard.session.snapshot();
        drop(guard);

        info!(
            device_id = %device.id,
            duration_seconds = params.duration_seconds,
            sample_interval_seconds = params.sample_interval_seconds,
            "Calibration started"
        );
        self.audit(AuditEventType::CalibrationStarted {
            device_id: device.id.clone(),
            duration_seconds: params.duration_seconds,
            sample_interval_seconds: params.sample_interval_seconds,
        });
        let _ = self.events.send(CoreEvent::CalibrationChanged(snapshot.clone()));

        let sampler = Sampler {
            slot,
            host: self.host.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            device_id: device.id.clone(),
            mac: device.mac.clone(),
            generation,
            interval: Duration::from_secs(params.sample_interval_seconds),
            read_timeout: self.read_timeout,
            cancel,
        };
        tokio::spawn(sampler.run());

        Ok(snapshot)
    }

    /// Current session snapshot; idle if the device never calibrated.
    pub fn get(&self, device_id: &DeviceId) -> CalibrationSnapshot {
        let slot = self.slots.lock().get(device_id).cloned();
        match slot {
            Some(slot) => slot.lock().session.snapshot(),
            None => CalibrationSnapshot::idle(device_id.clone()),
        }
    }

    pub fn cancel(&self, device_id: &DeviceId) -> Result<CalibrationSnapshot, CalibrationError> {
        let slot = self.slot(device_id);
        let mut guard = slot.lock();

        guard.session.cancel()?;
        if let Some(token) = guard.cancel.take() {
            token.cancel();
        }
        let snapshot = guard.session.snapshot();
        drop(guard);

        info!(device_id = %device_id, "Calibration cancelled");
        self.audit(AuditEventType::CalibrationCancelled {
            device_id: device_id.clone(),
        });
        let _ = self.events.send(CoreEvent::CalibrationChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Persist a completed session's recommendation as the device's
    /// threshold override and return the session to idle.
    pub fn apply(&self, device_id: &DeviceId) -> Result<Threshold, CalibrationError> {
        let slot = self.slot(device_id);
        let mut guard = slot.lock();

        let threshold = guard.session.recommendation()?;
        self.store
            .set_threshold_override(device_id, threshold.bytes())
            .map_err(|e| CalibrationError::Store(e.to_string()))?;
        guard.session.finish_apply()?;
        let snapshot = guard.session.snapshot();
        drop(guard);

        info!(device_id = %device_id, threshold = %threshold, "Calibrated threshold applied");
        self.audit(AuditEventType::ThresholdApplied {
            device_id: device_id.clone(),
            threshold: threshold.to_string(),
        });
        let _ = self.events.send(CoreEvent::CalibrationChanged(snapshot));
        Ok(threshold)
    }

    pub fn running_count(&self) -> usize {
        let slots: Vec<SharedSlot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|s| s.lock().session.is_running()).count()
    }

    /// Stop every sampler; sessions keep their current status.
    pub fn shutdown(&self) {
        let slots: Vec<SharedSlot> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            if let Some(token) = slot.lock().cancel.take() {
                token.cancel();
            }
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }
}

/// Background task feeding counter readings into one session
struct Sampler {
    slot: SharedSlot,
    host: Arc<dyn HostAdapter>,
    store: Arc<dyn Store>,
    events: mpsc::UnboundedSender<CoreEvent>,
    device_id: DeviceId,
    mac: String,
    generation: u64,
    interval: Duration,
    read_timeout: Duration,
    cancel: CancellationToken,
}

impl Sampler {
    async fn run(self) {
        // First tick fires immediately and takes the baseline reading
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                read = tokio::time::timeout(self.read_timeout, self.host.read_bytes(&self.mac)) => read,
            };

            let (outcome, snapshot) = {
                let mut guard = self.slot.lock();
                let outcome = match read {
                    Ok(Ok(counter)) => guard.session.record_counter(self.generation, counter),
                    Ok(Err(e)) => guard
                        .session
                        .fail(self.generation, format!("Sample read failed: {e}")),
                    Err(_) => guard.session.fail(
                        self.generation,
                        format!("Sample read timed out after {:?}", self.read_timeout),
                    ),
                };
                if matches!(outcome, SampleOutcome::Completed | SampleOutcome::Failed) {
                    guard.cancel = None;
                }
                (outcome, guard.session.snapshot())
            };

            match outcome {
                SampleOutcome::Baseline | SampleOutcome::Recorded => {
                    debug!(
                        device_id = %self.device_id,
                        samples = snapshot.sample_count,
                        progress = snapshot.progress_percent,
                        "Calibration sample"
                    );
                }
                SampleOutcome::Completed => {
                    info!(
                        device_id = %self.device_id,
                        p90 = ?snapshot.result_p90,
                        recommended = ?snapshot.recommended_threshold,
                        "Calibration completed"
                    );
                    self.finish(
                        AuditEventType::CalibrationCompleted {
                            device_id: self.device_id.clone(),
                            sample_count: snapshot.sample_count,
                            p90: snapshot.result_p90.unwrap_or_default(),
                            recommended: snapshot.result_recommended.unwrap_or_default(),
                        },
                        snapshot,
                    );
                    break;
                }
                SampleOutcome::Failed => {
                    let message = snapshot.error_message.clone().unwrap_or_default();
                    warn!(device_id = %self.device_id, error = %message, "Calibration failed");
                    self.finish(
                        AuditEventType::CalibrationFailed {
                            device_id: self.device_id.clone(),
                            message,
                        },
                        snapshot,
                    );
                    break;
                }
                SampleOutcome::Stale => {
                    debug!(device_id = %self.device_id, "Sampler superseded");
                    break;
                }
            }
        }
    }

    fn finish(&self, audit: AuditEventType, snapshot: CalibrationSnapshot) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(audit)) {
            warn!(error = %e, "Failed to write audit event");
        }
        let _ = self.events.send(CoreEvent::CalibrationChanged(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devtimer_api::CalibrationStatus;
    use devtimer_host_api::MockHost;
    use devtimer_store::SqliteStore;

    const MAC: &str = "aa:bb:cc:dd:ee:ff";

    fn device() -> Device {
        Device {
            id: DeviceId::new("console"),
            name: "Console".into(),
            mac: MAC.into(),
            enabled: true,
            traffic_threshold: None,
            schedule: vec![],
        }
    }

    struct Fixture {
        host: Arc<MockHost>,
        store: Arc<SqliteStore>,
        manager: CalibrationManager,
        events: mpsc::UnboundedReceiver<CoreEvent>,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(MockHost::new());
        host.set_counter(MAC, 0);
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (tx, events) = mpsc::unbounded_channel();
        let manager = CalibrationManager::new(host.clone(), store.clone(), tx)
            .with_read_timeout(Duration::from_secs(2));
        Fixture {
            host,
            store,
            manager,
            events,
        }
    }

    async fn wait_for_status(manager: &CalibrationManager, status: CalibrationStatus) -> CalibrationSnapshot {
        for _ in 0..1000 {
            let snap = manager.get(&DeviceId::new("console"));
            if snap.status == status {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("calibration never reached {status}");
    }

    #[tokio::test(start_paused = true)]
    async fn runs_to_completion_and_applies() {
        let mut f = fixture();
        f.host.set_growth(MAC, 10_000);

        let snap = f.manager.start(&device(), CalibrationParams::new(60, 10).unwrap()).unwrap();
        assert_eq!(snap.status, CalibrationStatus::Running);
        assert_eq!(f.manager.running_count(), 1);

        let done = wait_for_status(&f.manager, CalibrationStatus::Completed).await;
        assert_eq!(done.sample_count, 6);
        assert!(done.samples.iter().all(|&s| s == 60_000));
        assert_eq!(done.result_p90, Some(60_000));
        assert_eq!(done.recommended_threshold.as_deref(), Some("88K"));
        assert_eq!(f.manager.running_count(), 0);

        let threshold = f.manager.apply(&DeviceId::new("console")).unwrap();
        assert_eq!(threshold.to_string(), "88K");
        assert_eq!(
            f.store.get_threshold_override(&DeviceId::new("console")).unwrap(),
            Some(88 * 1024)
        );
        assert_eq!(
            f.manager.get(&DeviceId::new("console")).status,
            CalibrationStatus::Idle
        );

        let mut statuses = Vec::new();
        while let Ok(CoreEvent::CalibrationChanged(s)) = f.events.try_recv() {
            statuses.push(s.status);
        }
        assert_eq!(
            statuses,
            vec![
                CalibrationStatus::Running,
                CalibrationStatus::Completed,
                CalibrationStatus::Idle
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_busy() {
        let f = fixture();
        let params = CalibrationParams::new(600, 10).unwrap();

        f.manager.start(&device(), params).unwrap();
        let before = f.manager.get(&DeviceId::new("console"));

        let err = f.manager.start(&device(), params).unwrap_err();
        assert!(matches!(err, CalibrationError::SessionBusy(_)));
        assert_eq!(f.manager.get(&DeviceId::new("console")).start_time, before.start_time);
        assert_eq!(f.manager.running_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_sampling() {
        let f = fixture();
        f.host.set_growth(MAC, 1_000);
        f.manager.start(&device(), CalibrationParams::new(600, 10).unwrap()).unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(f.manager.get(&DeviceId::new("console")).sample_count > 0);

        let snap = f.manager.cancel(&DeviceId::new("console")).unwrap();
        assert_eq!(snap.status, CalibrationStatus::Idle);
        assert!(snap.samples.is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let after = f.manager.get(&DeviceId::new("console"));
        assert_eq!(after.status, CalibrationStatus::Idle);
        assert!(after.samples.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_moves_to_error() {
        let f = fixture();
        f.manager.start(&device(), CalibrationParams::new(60, 10).unwrap()).unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        f.host.set_fail_reads(true);
        let snap = wait_for_status(&f.manager, CalibrationStatus::Error).await;
        assert!(snap.error_message.unwrap().contains("Sample read failed"));
        assert_eq!(f.manager.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_read_times_out() {
        let f = fixture();
        f.host.set_read_delay(Some(Duration::from_secs(30)));
        f.manager.start(&device(), CalibrationParams::new(60, 10).unwrap()).unwrap();

        let snap = wait_for_status(&f.manager, CalibrationStatus::Error).await;
        assert!(snap.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancel_and_apply_need_the_right_state() {
        let f = fixture();
        let id = DeviceId::new("console");
        assert!(matches!(
            f.manager.cancel(&id),
            Err(CalibrationError::InvalidState { .. })
        ));
        assert!(matches!(
            f.manager.apply(&id),
            Err(CalibrationError::InvalidState { .. })
        ));
        assert_eq!(f.manager.get(&id).status, CalibrationStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_starts_admit_exactly_one() {
        let f = fixture();
        let manager = Arc::new(f.manager);
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let manager = manager.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                manager.start(&device(), CalibrationParams::new(600, 60).unwrap())
            }));
        }

        let mut started = 0;
        let mut busy = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => started += 1,
                Err(CalibrationError::SessionBusy(_)) => busy += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(started, 1);
        assert_eq!(busy, 31);
        assert_eq!(manager.running_count(), 1);
        manager.shutdown();
    }
}
