//! Time-window evaluation: is "now" inside a task's allowed period.
//!
//! Pure functions over the task's period setting and the global work-hour
//! settings. Alignment modes resolve their bounds from settings on
//! every call, so a work-hours edit takes effect immediately.
//!
//! Evaluation takes the user's wall clock as a `NaiveDateTime`; callers
//! convert from their zoned time first. Sync metadata stays UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::settings::AppSettings;
use crate::task::Task;

/// When a task is allowed to be selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "period")]
pub enum AllowedPeriod {
    #[default]
    Any,
    /// Inside the global work-hour window, every day.
    Work,
    /// Outside the global work-hour window, every day.
    OffWork,
    /// Reference to a stored [`PeriodDefinition`] by id. A dangling
    /// reference degrades to Any rather than failing selection.
    Named { id: String },
    /// Ad-hoc definition embedded in the task.
    Custom { definition: PeriodDefinition },
}

/// How a definition's bounds relate to the global work hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Use the definition's own start/end literally.
    #[default]
    Fixed,
    /// Bounds track the settings work window.
    WorkHours,
    /// Bounds track the complement of the settings work window.
    OffWorkHours,
}

/// A named, reusable allowed-time-period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodDefinition {
    pub id: String,
    pub name: String,
    /// Days the window applies on. Empty mask means never.
    pub weekdays: Vec<Weekday>,
    #[serde(default)]
    pub all_day: bool,
    /// Ignored when `all_day` or a non-Fixed alignment is set.
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default)]
    pub event_version: u64,
    pub updated_at: DateTime<Utc>,
}

impl PeriodDefinition {
    /// A window must not wrap midnight; `end <= start` is rejected so
    /// it can never silently become an empty window at evaluation time.
    pub fn validate(&self) -> Result<(), String> {
        if self.weekdays.is_empty() {
            return Err("weekday mask is empty".into());
        }
        if !self.all_day && self.alignment == Alignment::Fixed && self.end <= self.start {
            return Err(format!("window end {} is not after start {}", self.end, self.start));
        }
        Ok(())
    }

    fn contains(&self, now: NaiveDateTime, settings: &AppSettings) -> bool {
        if !self.weekdays.contains(&now.weekday()) {
            return false;
        }
        if self.all_day {
            return true;
        }
        let tod = now.time();
        match self.alignment {
            Alignment::Fixed => {
                // end <= start is an empty window, caught by validate().
                self.start <= tod && tod < self.end
            }
            Alignment::WorkHours => in_work_hours(tod, settings),
            Alignment::OffWorkHours => !in_work_hours(tod, settings),
        }
    }
}

fn in_work_hours(tod: NaiveTime, settings: &AppSettings) -> bool {
    settings.work_start <= tod && tod < settings.work_end
}

/// Whether `now` falls within the task's allowed period.
///
/// `periods` is the stored set of named definitions; a Named reference
/// that resolves to nothing falls back to Any.
pub fn is_within_allowed_period(
    task: &Task,
    now: NaiveDateTime,
    settings: &AppSettings,
    periods: &[PeriodDefinition],
) -> bool {
    match &task.allowed_period {
        AllowedPeriod::Any => true,
        AllowedPeriod::Work => in_work_hours(now.time(), settings),
        AllowedPeriod::OffWork => !in_work_hours(now.time(), settings),
        AllowedPeriod::Named { id } => match periods.iter().find(|p| &p.id == id) {
            Some(def) => def.contains(now, settings),
            None => {
                tracing::debug!(period = %id, "named period not found, falling back to Any");
                true
            }
        },
        AllowedPeriod::Custom { definition } => definition.contains(now, settings),
    }
}

/// Scan granularity for boundary search.
const BOUNDARY_STEP_MINUTES: i64 = 15;
/// Give up after this horizon; an empty weekday mask never flips.
const BOUNDARY_HORIZON_DAYS: i64 = 8;

/// Time until the allowed-period predicate next flips, used to schedule
/// "on a break, retry in N minutes" notices. Returns `None` when no
/// flip occurs within the scan horizon.
pub fn time_until_next_boundary(
    now: NaiveDateTime,
    task: &Task,
    settings: &AppSettings,
    periods: &[PeriodDefinition],
) -> Option<Duration> {
    let current = is_within_allowed_period(task, now, settings, periods);
    let step = Duration::minutes(BOUNDARY_STEP_MINUTES);
    let horizon = now + Duration::days(BOUNDARY_HORIZON_DAYS);

    let mut cursor = now + step;
    while cursor <= horizon {
        if is_within_allowed_period(task, cursor, settings, periods) != current {
            return Some(cursor - now);
        }
        cursor += step;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Owner;
    use chrono::NaiveDate;

    fn settings() -> AppSettings {
        let mut s = AppSettings::default();
        s.work_start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        s.work_end = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        s
    }

    fn task_with(period: AllowedPeriod) -> Task {
        let mut t = Task::new("t", Owner::Device("dev-1".into()));
        t.allowed_period = period;
        t
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        // 2026-08-24 is a Monday.
        NaiveDate::from_ymd_opt(2026, 8, 24).unwrap().and_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn any_is_always_allowed() {
        let t = task_with(AllowedPeriod::Any);
        assert!(is_within_allowed_period(&t, at(3, 0), &settings(), &[]));
        assert!(is_within_allowed_period(&t, at(12, 0), &settings(), &[]));
    }

    #[test]
    fn work_and_offwork_partition_every_instant() {
        let s = settings();
        let work = task_with(AllowedPeriod::Work);
        let off = task_with(AllowedPeriod::OffWork);
        for (h, m) in [(0, 0), (8, 59), (9, 0), (12, 30), (16, 59), (17, 0), (23, 45)] {
            let now = at(h, m);
            let w = is_within_allowed_period(&work, now, &s, &[]);
            let o = is_within_allowed_period(&off, now, &s, &[]);
            assert_ne!(w, o, "exactly one of Work/OffWork must hold at {h:02}:{m:02}");
        }
    }

    #[test]
    fn work_window_is_half_open() {
        let s = settings();
        let work = task_with(AllowedPeriod::Work);
        assert!(is_within_allowed_period(&work, at(9, 0), &s, &[]));
        assert!(!is_within_allowed_period(&work, at(17, 0), &s, &[]));
    }

    fn evenings() -> PeriodDefinition {
        PeriodDefinition {
            id: "evenings".into(),
            name: "Evenings".into(),
            weekdays: vec![Weekday::Mon, Weekday::Tue],
            all_day: false,
            start: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            alignment: Alignment::Fixed,
            event_version: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn named_definition_checks_weekday_and_window() {
        let s = settings();
        let defs = [evenings()];
        let t = task_with(AllowedPeriod::Named { id: "evenings".into() });
        assert!(is_within_allowed_period(&t, at(19, 0), &s, &defs));
        assert!(!is_within_allowed_period(&t, at(12, 0), &s, &defs));
        // Wednesday is outside the mask.
        let wed = NaiveDate::from_ymd_opt(2026, 8, 26).unwrap().and_hms_opt(19, 0, 0).unwrap();
        assert!(!is_within_allowed_period(&t, wed, &s, &defs));
    }

    #[test]
    fn dangling_named_reference_falls_back_to_any() {
        let t = task_with(AllowedPeriod::Named { id: "gone".into() });
        assert!(is_within_allowed_period(&t, at(3, 0), &settings(), &[]));
    }

    #[test]
    fn all_day_ignores_time_of_day() {
        let mut def = evenings();
        def.all_day = true;
        let t = task_with(AllowedPeriod::Custom { definition: def });
        assert!(is_within_allowed_period(&t, at(3, 0), &settings(), &[]));
    }

    #[test]
    fn alignment_tracks_current_settings() {
        let mut def = evenings();
        def.alignment = Alignment::WorkHours;
        let t = task_with(AllowedPeriod::Custom { definition: def });

        let mut s = settings();
        assert!(is_within_allowed_period(&t, at(10, 0), &s, &[]));
        // Shrinking the work window immediately changes the answer.
        s.work_end = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert!(!is_within_allowed_period(&t, at(10, 0), &s, &[]));
    }

    #[test]
    fn validate_rejects_wrapping_window() {
        let mut def = evenings();
        def.start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        def.end = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        assert!(def.validate().is_err());
        def.all_day = true;
        assert!(def.validate().is_ok());
    }

    #[test]
    fn boundary_scan_finds_work_start() {
        let s = settings();
        let t = task_with(AllowedPeriod::Work);
        // 08:00 Monday, window opens at 09:00.
        let until = time_until_next_boundary(at(8, 0), &t, &s, &[]).unwrap();
        assert_eq!(until, Duration::hours(1));
    }

    #[test]
    fn boundary_scan_gives_up_when_window_never_flips() {
        let t = task_with(AllowedPeriod::Any);
        assert!(time_until_next_boundary(at(8, 0), &t, &settings(), &[]).is_none());
    }
}
