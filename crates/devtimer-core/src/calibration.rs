//! Calibration session state machine
//!
//! A calibration measures a device's background traffic while nobody is
//! using it. Samples are byte rates in bytes per minute; the 90th
//! percentile of the samples, plus a margin, becomes the recommended
//! usage-detection threshold.
//!
//! ```text
//! Idle ──start──▶ Running ──duration reached──▶ Completed ──apply──▶ Idle
//!                  │   ▲                            │
//!            cancel│   └───────start────────────────┤
//!                  ▼                                │
//!                 Idle        Error ◀──read failed──┘ (from Running)
//! ```

use chrono::{DateTime, Local};
use devtimer_api::{CalibrationSnapshot, CalibrationStatus};
use devtimer_config::{KIB, Threshold};
use devtimer_util::DeviceId;
use thiserror::Error;

/// Longest calibration accepted, one day
pub const MAX_CALIBRATION_SECONDS: u64 = 86_400;

/// Percentile of the idle samples taken as the noise floor
pub const NOISE_FLOOR_PERCENTILE: u64 = 90;

/// Margin above the noise floor, as a ratio `NUMERATOR / DENOMINATOR`
pub const RECOMMENDATION_MARGIN_NUMERATOR: u64 = 3;
pub const RECOMMENDATION_MARGIN_DENOMINATOR: u64 = 2;

/// Recommendations never go below this many bytes per minute
pub const MIN_RECOMMENDED_BYTES_PER_MINUTE: u64 = 64 * KIB;

/// Calibration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("Calibration already running for device '{0}'")]
    SessionBusy(DeviceId),

    #[error("Calibration for device '{device_id}' is {status}, expected {expected}")]
    InvalidState {
        device_id: DeviceId,
        status: CalibrationStatus,
        expected: CalibrationStatus,
    },

    #[error("Invalid calibration parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to save threshold: {0}")]
    Store(String),
}

/// Requested duration and sampling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationParams {
    pub duration_seconds: u64,
    pub sample_interval_seconds: u64,
}

impl CalibrationParams {
    pub fn new(duration_seconds: u64, sample_interval_seconds: u64) -> Result<Self, CalibrationError> {
        if duration_seconds == 0 || duration_seconds > MAX_CALIBRATION_SECONDS {
            return Err(CalibrationError::InvalidParameters(format!(
                "duration must be between 1 and {MAX_CALIBRATION_SECONDS} seconds, got {duration_seconds}"
            )));
        }
        if sample_interval_seconds == 0 || sample_interval_seconds > duration_seconds {
            return Err(CalibrationError::InvalidParameters(format!(
                "sample interval must be between 1 and {duration_seconds} seconds, got {sample_interval_seconds}"
            )));
        }
        Ok(Self {
            duration_seconds,
            sample_interval_seconds,
        })
    }
}

/// What a sampling step did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// First reading; establishes the counter baseline
    Baseline,
    /// Sample recorded, keep going
    Recorded,
    /// Duration reached, results computed
    Completed,
    /// Session moved to `Error`
    Failed,
    /// The session was cancelled or restarted since this sampler began
    Stale,
}

/// Nearest-rank percentile: the value at index `ceil(p/100 * n) - 1` of the
/// sorted samples, clamped to the valid range.
pub fn nearest_rank_percentile(samples: &[u64], percentile: u64) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let n = sorted.len() as u64;
    let rank = (percentile * n).div_ceil(100);
    let index = rank.saturating_sub(1).min(n - 1) as usize;
    Some(sorted[index])
}

/// `max(p90 * 3/2, 64 KiB)`, rounded up to a whole KiB.
pub fn recommended_threshold(p90: u64) -> Threshold {
    let with_margin = p90.saturating_mul(RECOMMENDATION_MARGIN_NUMERATOR)
        / RECOMMENDATION_MARGIN_DENOMINATOR;
    Threshold::from_bytes_rounded_up(with_margin.max(MIN_RECOMMENDED_BYTES_PER_MINUTE))
}

/// Byte rate between two counter readings, in bytes per minute.
///
/// A counter lower than the previous reading means the gateway reset it;
/// the new value is then taken as the traffic since the reset.
pub fn bytes_per_minute(previous: u64, current: u64, interval_seconds: u64) -> u64 {
    let delta = if current >= previous {
        current - previous
    } else {
        current
    };
    delta.saturating_mul(60) / interval_seconds.max(1)
}

/// One device's calibration session
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    device_id: DeviceId,
    status: CalibrationStatus,
    start_time: Option<DateTime<Local>>,
    params: Option<CalibrationParams>,
    samples: Vec<u64>,
    elapsed_seconds: u64,
    result_p90: Option<u64>,
    result_recommended: Option<Threshold>,
    error_message: Option<String>,
    last_counter: Option<u64>,
    /// Bumped on every start and cancel so a superseded sampler can tell
    generation: u64,
}

impl CalibrationSession {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            status: CalibrationStatus::Idle,
            start_time: None,
            params: None,
            samples: Vec::new(),
            elapsed_seconds: 0,
            result_p90: None,
            result_recommended: None,
            error_message: None,
            last_counter: None,
            generation: 0,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn status(&self) -> CalibrationStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    pub fn result_p90(&self) -> Option<u64> {
        self.result_p90
    }

    pub fn result_recommended(&self) -> Option<Threshold> {
        self.result_recommended
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.status == CalibrationStatus::Running
    }

    /// Begin a new measurement, discarding any previous result.
    ///
    /// Returns the generation the sampler must present with each reading.
    pub fn start(&mut self, params: CalibrationParams, now: DateTime<Local>) -> Result<u64, CalibrationError> {
        if self.is_running() {
            return Err(CalibrationError::SessionBusy(self.device_id.clone()));
        }

        self.reset();
        self.status = CalibrationStatus::Running;
        self.start_time = Some(now);
        self.params = Some(params);
        Ok(self.generation)
    }

    /// Feed one cumulative counter reading taken by sampler `generation`.
    pub fn record_counter(&mut self, generation: u64, counter: u64) -> SampleOutcome {
        let Some(params) = self.params.filter(|_| self.accepts(generation)) else {
            return SampleOutcome::Stale;
        };

        let Some(previous) = self.last_counter.replace(counter) else {
            return SampleOutcome::Baseline;
        };

        self.samples.push(bytes_per_minute(
            previous,
            counter,
            params.sample_interval_seconds,
        ));
        self.elapsed_seconds = (self.elapsed_seconds + params.sample_interval_seconds)
            .min(params.duration_seconds);

        if self.elapsed_seconds < params.duration_seconds {
            return SampleOutcome::Recorded;
        }

        match nearest_rank_percentile(&self.samples, NOISE_FLOOR_PERCENTILE) {
            Some(p90) => {
                self.result_p90 = Some(p90);
                self.result_recommended = Some(recommended_threshold(p90));
                self.status = CalibrationStatus::Completed;
                SampleOutcome::Completed
            }
            None => self.fail(generation, "No samples collected"),
        }
    }

    /// Move a running session to `Error`; collected samples stay inspectable.
    pub fn fail(&mut self, generation: u64, message: impl Into<String>) -> SampleOutcome {
        if !self.accepts(generation) {
            return SampleOutcome::Stale;
        }
        self.status = CalibrationStatus::Error;
        self.error_message = Some(message.into());
        SampleOutcome::Failed
    }

    /// Stop a running session and return to `Idle`.
    pub fn cancel(&mut self) -> Result<(), CalibrationError> {
        self.expect_status(CalibrationStatus::Running)?;
        self.reset();
        Ok(())
    }

    /// The threshold a completed session recommends.
    pub fn recommendation(&self) -> Result<Threshold, CalibrationError> {
        self.expect_status(CalibrationStatus::Completed)?;
        self.result_recommended
            .ok_or_else(|| CalibrationError::InvalidParameters("completed without a result".into()))
    }

    /// Return a completed session to `Idle` once its threshold is saved.
    pub fn finish_apply(&mut self) -> Result<(), CalibrationError> {
        self.expect_status(CalibrationStatus::Completed)?;
        self.reset();
        Ok(())
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        let (duration_seconds, sample_interval_seconds) = self
            .params
            .map(|p| (p.duration_seconds, p.sample_interval_seconds))
            .unwrap_or((0, 0));

        let progress_percent = if duration_seconds == 0 {
            0
        } else {
            (self.elapsed_seconds.saturating_mul(100) / duration_seconds).min(100) as u8
        };

        CalibrationSnapshot {
            device_id: self.device_id.clone(),
            status: self.status,
            start_time: self.start_time,
            duration_seconds,
            sample_interval_seconds,
            elapsed_seconds: self.elapsed_seconds,
            sample_count: self.samples.len(),
            samples: self.samples.clone(),
            progress_percent,
            result_p90: self.result_p90,
            result_recommended: self.result_recommended.map(|t| t.bytes()),
            recommended_threshold: self.result_recommended.map(|t| t.to_string()),
            error_message: self.error_message.clone(),
        }
    }

    fn accepts(&self, generation: u64) -> bool {
        self.is_running() && self.generation == generation
    }

    fn expect_status(&self, expected: CalibrationStatus) -> Result<(), CalibrationError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(CalibrationError::InvalidState {
                device_id: self.device_id.clone(),
                status: self.status,
                expected,
            })
        }
    }

    fn reset(&mut self) {
        *self = Self {
            generation: self.generation + 1,
            ..Self::new(self.device_id.clone())
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CalibrationSession {
        CalibrationSession::new(DeviceId::new("console"))
    }

    fn params(duration: u64, interval: u64) -> CalibrationParams {
        CalibrationParams::new(duration, interval).unwrap()
    }

    #[test]
    fn p90_nearest_rank() {
        let samples: Vec<u64> = (1..=10).map(|i| i * 10).collect();
        assert_eq!(nearest_rank_percentile(&samples, 90), Some(90));

        assert_eq!(nearest_rank_percentile(&[7], 90), Some(7));
        assert_eq!(nearest_rank_percentile(&[5, 1], 90), Some(5));
        assert_eq!(nearest_rank_percentile(&[3, 1, 2], 90), Some(3));
        assert_eq!(nearest_rank_percentile(&[], 90), None);
    }

    #[test]
    fn p90_ignores_input_order() {
        let samples = [100, 10, 90, 20, 80, 30, 70, 40, 60, 50];
        assert_eq!(nearest_rank_percentile(&samples, 90), Some(90));
    }

    #[test]
    fn recommendation_has_margin_and_floor() {
        assert_eq!(recommended_threshold(0).bytes(), 64 * KIB);
        assert_eq!(recommended_threshold(40 * KIB).bytes(), 64 * KIB);
        assert_eq!(recommended_threshold(100 * KIB).bytes(), 150 * KIB);
        assert_eq!(recommended_threshold(100 * KIB + 1).bytes(), 151 * KIB);
        assert_eq!(recommended_threshold(4 * 1024 * KIB).to_string(), "6M");
    }

    #[test]
    fn byte_rate_normalizes_to_minutes() {
        assert_eq!(bytes_per_minute(1000, 1500, 10), 3000);
        assert_eq!(bytes_per_minute(1000, 1000, 60), 0);
        assert_eq!(bytes_per_minute(5000, 200, 30), 400);
    }

    #[test]
    fn parameters_are_validated() {
        assert!(CalibrationParams::new(0, 1).is_err());
        assert!(CalibrationParams::new(MAX_CALIBRATION_SECONDS + 1, 10).is_err());
        assert!(CalibrationParams::new(60, 0).is_err());
        assert!(CalibrationParams::new(60, 61).is_err());
        assert!(CalibrationParams::new(60, 60).is_ok());
    }

    #[test]
    fn full_run_completes_with_results() {
        let mut s = session();
        let generation = s.start(params(30, 10), Local::now()).unwrap();
        assert_eq!(s.status(), CalibrationStatus::Running);

        assert_eq!(s.record_counter(generation, 0), SampleOutcome::Baseline);
        assert_eq!(s.record_counter(generation, 1000), SampleOutcome::Recorded);
        assert_eq!(s.snapshot().progress_percent, 33);
        assert_eq!(s.record_counter(generation, 3000), SampleOutcome::Recorded);
        assert_eq!(s.record_counter(generation, 3500), SampleOutcome::Completed);

        let snap = s.snapshot();
        assert_eq!(snap.status, CalibrationStatus::Completed);
        assert_eq!(snap.samples, vec![6000, 12000, 3000]);
        assert_eq!(snap.elapsed_seconds, 30);
        assert_eq!(snap.progress_percent, 100);
        assert_eq!(snap.result_p90, Some(12000));
        assert_eq!(snap.result_recommended, Some(64 * KIB));
        assert_eq!(snap.recommended_threshold.as_deref(), Some("64K"));
    }

    #[test]
    fn start_while_running_is_busy_and_leaves_session_untouched() {
        let mut s = session();
        let generation = s.start(params(60, 10), Local::now()).unwrap();
        s.record_counter(generation, 0);
        s.record_counter(generation, 100);
        let before = s.snapshot();

        let err = s.start(params(120, 5), Local::now()).unwrap_err();
        assert_eq!(err, CalibrationError::SessionBusy(DeviceId::new("console")));
        assert_eq!(s.snapshot(), before);
        assert_eq!(s.generation(), generation);
    }

    #[test]
    fn cancel_resets_to_idle_and_invalidates_sampler() {
        let mut s = session();
        let generation = s.start(params(60, 10), Local::now()).unwrap();
        s.record_counter(generation, 0);
        s.record_counter(generation, 100);

        s.cancel().unwrap();
        let snap = s.snapshot();
        assert_eq!(snap.status, CalibrationStatus::Idle);
        assert!(snap.samples.is_empty());
        assert_eq!(snap.elapsed_seconds, 0);

        assert_eq!(s.record_counter(generation, 200), SampleOutcome::Stale);
        assert!(s.samples().is_empty());
    }

    #[test]
    fn cancel_only_from_running() {
        let mut s = session();
        assert!(matches!(
            s.cancel(),
            Err(CalibrationError::InvalidState { status: CalibrationStatus::Idle, .. })
        ));
    }

    #[test]
    fn apply_only_from_completed() {
        let mut s = session();
        assert!(s.recommendation().is_err());

        let generation = s.start(params(10, 10), Local::now()).unwrap();
        assert!(s.recommendation().is_err());
        s.record_counter(generation, 0);
        s.record_counter(generation, 60_000);

        assert_eq!(s.recommendation().unwrap().to_string(), "528K");
        s.finish_apply().unwrap();
        assert_eq!(s.status(), CalibrationStatus::Idle);
        assert!(s.finish_apply().is_err());
    }

    #[test]
    fn read_failure_moves_to_error_and_keeps_samples() {
        let mut s = session();
        let generation = s.start(params(60, 10), Local::now()).unwrap();
        s.record_counter(generation, 0);
        s.record_counter(generation, 100);

        assert_eq!(s.fail(generation, "timeout"), SampleOutcome::Failed);
        assert_eq!(s.status(), CalibrationStatus::Error);
        assert_eq!(s.error_message(), Some("timeout"));
        assert_eq!(s.samples().len(), 1);

        // Error -> Running is allowed
        let next = s.start(params(60, 10), Local::now()).unwrap();
        assert!(next > generation);
        assert!(s.samples().is_empty());
        assert_eq!(s.error_message(), None);
    }

    #[test]
    fn completed_can_restart() {
        let mut s = session();
        let generation = s.start(params(10, 10), Local::now()).unwrap();
        s.record_counter(generation, 0);
        s.record_counter(generation, 10);
        assert_eq!(s.status(), CalibrationStatus::Completed);

        s.start(params(10, 10), Local::now()).unwrap();
        assert_eq!(s.status(), CalibrationStatus::Running);
        assert_eq!(s.result_p90(), None);
    }

    #[test]
    fn uneven_duration_caps_elapsed() {
        let mut s = session();
        let generation = s.start(params(25, 10), Local::now()).unwrap();
        s.record_counter(generation, 0);
        s.record_counter(generation, 0);
        s.record_counter(generation, 0);
        assert_eq!(s.record_counter(generation, 0), SampleOutcome::Completed);
        assert_eq!(s.snapshot().elapsed_seconds, 25);
        assert_eq!(s.samples().len(), 3);
    }
}
