//! Device state evaluation

use chrono::{DateTime, Datelike, Local};
use devtimer_api::DeviceState;
use devtimer_config::{Device, ScheduleEntry};
use devtimer_util::minute_of_day;

/// Full result of evaluating one device at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub state: DeviceState,
    /// Any entry exists for now's weekday
    pub has_schedule_today: bool,
    /// The entry whose window covers now
    pub window: Option<ScheduleEntry>,
    /// `None` outside windows and for unlimited windows
    pub limit_minutes: Option<u32>,
    pub remaining_minutes: Option<u32>,
}

impl Evaluation {
    pub fn in_time_window(&self) -> bool {
        self.window.is_some()
    }
}

/// Classify a device for `now` given minutes already used today.
pub fn evaluate(now: &DateTime<Local>, device: &Device, usage_minutes: u32) -> DeviceState {
    evaluate_detailed(now, device, usage_minutes).state
}

/// Like [`evaluate`], also returning the covering window and remaining minutes.
///
/// Entries are selected by now's weekday only: the tail of a Monday
/// overnight window (`Mon,22:00-02:00`) covers Monday 00:00-02:00, not
/// Tuesday morning.
pub fn evaluate_detailed(now: &DateTime<Local>, device: &Device, usage_minutes: u32) -> Evaluation {
    let weekday = now.weekday();
    let minute = minute_of_day(now);

    let has_schedule_today = device.has_schedule_on(weekday);
    let window = device.entries_for(weekday).find(|e| e.covers(minute)).copied();

    let mut eval = Evaluation {
        state: DeviceState::Disabled,
        has_schedule_today,
        window,
        limit_minutes: None,
        remaining_minutes: None,
    };

    if !device.enabled {
        return eval;
    }

    let state = match window {
        _ if !has_schedule_today => DeviceState::NoSchedule,
        None => DeviceState::OutsideWindow,
        Some(entry) if entry.is_unlimited() => DeviceState::Unlimited,
        Some(entry) => {
            eval.limit_minutes = Some(entry.limit_minutes);
            eval.remaining_minutes = Some(entry.limit_minutes.saturating_sub(usage_minutes));
            if usage_minutes < entry.limit_minutes {
                DeviceState::Active
            } else {
                DeviceState::Blocked
            }
        }
    };

    eval.state = state;
    eval
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devtimer_util::DeviceId;

    fn device(enabled: bool, schedule: &[&str]) -> Device {
        Device {
            id: DeviceId::new("tablet"),
            name: "Tablet".into(),
            mac: "aa:bb:cc:dd:ee:ff".into(),
            enabled,
            traffic_threshold: None,
            schedule: schedule.iter().map(|s| s.parse().unwrap()).collect(),
        }
    }

    // 2025-06-02 is a Monday
    fn monday(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    fn tuesday(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 3, h, m, 0).unwrap()
    }

    #[test]
    fn disabled_device_is_disabled_regardless_of_schedule() {
        let d = device(false, &["Mon,00:00-23:59,0"]);
        let eval = evaluate_detailed(&monday(12, 0), &d, 0);
        assert_eq!(eval.state, DeviceState::Disabled);
        assert_eq!(eval.remaining_minutes, None);
    }

    #[test]
    fn device_without_any_schedule() {
        let d = device(true, &[]);
        assert_eq!(evaluate(&monday(12, 0), &d, 0), DeviceState::NoSchedule);
    }

    #[test]
    fn no_entry_for_today() {
        let d = device(true, &["Tue,08:00-20:00,60"]);
        let eval = evaluate_detailed(&monday(12, 0), &d, 0);
        assert_eq!(eval.state, DeviceState::NoSchedule);
        assert!(!eval.has_schedule_today);
    }

    #[test]
    fn outside_window() {
        let d = device(true, &["Mon,14:00-18:00,60"]);
        let eval = evaluate_detailed(&monday(13, 59), &d, 0);
        assert_eq!(eval.state, DeviceState::OutsideWindow);
        assert!(eval.has_schedule_today);
        assert!(!eval.in_time_window());
        assert_eq!(evaluate(&monday(18, 0), &d, 0), DeviceState::OutsideWindow);
    }

    #[test]
    fn unlimited_window() {
        let d = device(true, &["Mon,14:00-18:00,0"]);
        let eval = evaluate_detailed(&monday(15, 0), &d, 500);
        assert_eq!(eval.state, DeviceState::Unlimited);
        assert_eq!(eval.limit_minutes, None);
        assert_eq!(eval.remaining_minutes, None);
    }

    #[test]
    fn active_until_limit_then_blocked() {
        let d = device(true, &["Mon,14:00-18:00,60"]);

        let eval = evaluate_detailed(&monday(14, 0), &d, 59);
        assert_eq!(eval.state, DeviceState::Active);
        assert_eq!(eval.limit_minutes, Some(60));
        assert_eq!(eval.remaining_minutes, Some(1));

        let eval = evaluate_detailed(&monday(14, 0), &d, 60);
        assert_eq!(eval.state, DeviceState::Blocked);
        assert_eq!(eval.remaining_minutes, Some(0));

        assert_eq!(evaluate(&monday(17, 59), &d, 75), DeviceState::Blocked);
    }

    #[test]
    fn overnight_window_covers_both_ends_of_its_own_weekday() {
        let d = device(true, &["Mon,22:00-02:00,30"]);
        assert_eq!(evaluate(&monday(23, 30), &d, 0), DeviceState::Active);
        assert_eq!(evaluate(&monday(1, 0), &d, 0), DeviceState::Active);
        assert_eq!(evaluate(&monday(2, 0), &d, 0), DeviceState::OutsideWindow);
        assert_eq!(evaluate(&tuesday(1, 0), &d, 0), DeviceState::NoSchedule);
    }

    #[test]
    fn picks_the_covering_entry_among_several() {
        let d = device(true, &["Mon,07:00-08:00,0", "Mon,16:00-19:00,45"]);
        let eval = evaluate_detailed(&monday(7, 30), &d, 100);
        assert_eq!(eval.state, DeviceState::Unlimited);

        let eval = evaluate_detailed(&monday(16, 30), &d, 10);
        assert_eq!(eval.state, DeviceState::Active);
        assert_eq!(eval.window.map(|w| w.limit_minutes), Some(45));
        assert_eq!(eval.remaining_minutes, Some(35));
    }

    #[test]
    fn empty_window_covers_nothing() {
        let d = device(true, &["Mon,12:00-12:00,30"]);
        assert_eq!(evaluate(&monday(12, 0), &d, 0), DeviceState::OutsideWindow);
    }
}
