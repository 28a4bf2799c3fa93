//! Task model: the unit of work the selector ranks and the sync layer
//! replicates.
//!
//! Ownership is modeled as an enum so a task is structurally either
//! device-scoped or user-scoped, never both. Every persisted mutation
//! must go through [`Task::touch`] so `event_version` strictly
//! increases -- the version is the primary key for conflict resolution.

pub mod lifecycle;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::period::AllowedPeriod;

/// Who a task belongs to. Exactly one scope holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum Owner {
    /// Task lives on a single device and syncs only between that
    /// user's paired devices.
    Device(String),
    /// Task belongs to a user account and follows the user id.
    User(String),
}

impl Owner {
    pub fn id(&self) -> &str {
        match self {
            Owner::Device(id) | Owner::User(id) => id,
        }
    }
}

/// Repeat cadence for recurring tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RepeatRule {
    #[default]
    None,
    /// Every N days, anchored to the last completion.
    Daily { every_days: u32 },
    /// On a set of weekdays at a fixed time of day.
    Weekly { weekdays: Vec<Weekday>, at: NaiveTime },
    /// N days after each completion, regardless of weekday.
    Interval { every_days: u32 },
}

impl RepeatRule {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, RepeatRule::None)
    }

    /// Nominal cadence in days, used by the repeat-urgency ramp.
    pub fn cadence_days(&self) -> Option<f64> {
        match self {
            RepeatRule::None => None,
            RepeatRule::Daily { every_days } | RepeatRule::Interval { every_days } => {
                Some((*every_days).max(1) as f64)
            }
            RepeatRule::Weekly { weekdays, .. } => {
                let per_week = weekdays.len().max(1) as f64;
                Some(7.0 / per_week)
            }
        }
    }
}

/// Selection override that bypasses scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CutInLine {
    #[default]
    None,
    /// Forced exactly once; cleared by the caller after selection.
    Once,
    /// Forced on every shuffle until the user turns it off.
    Sticky,
}

/// Timer behavior for the active task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum TimerMode {
    /// Plain countdown of `reminder_minutes`.
    Countdown,
    /// Focus/break cycling.
    Pomodoro { focus_minutes: u32, break_minutes: u32, cycles: u32 },
}

impl Default for TimerMode {
    fn default() -> Self {
        TimerMode::Countdown
    }
}

/// Per-task timer override. Absent fields fall back to global settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimerOverride {
    #[serde(default)]
    pub mode: Option<TimerMode>,
    #[serde(default)]
    pub reminder_minutes: Option<u32>,
}

/// Lifecycle status. Field population rules are enforced by
/// [`lifecycle::is_valid_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Snoozed,
    Completed,
}

/// Error returned when an illegal lifecycle transition is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: String,
    /// Device- or user-scope ownership.
    pub owner: Owner,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Importance 1-5. Out-of-range values are clamped at scoring time.
    pub importance: i32,
    /// Size estimate in story points. Non-positive values are treated
    /// as the 3.0 default at scoring time.
    #[serde(default = "default_size_points")]
    pub size_points: f64,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub repeat: RepeatRule,
    #[serde(default)]
    pub allowed_period: AllowedPeriod,
    /// Paused tasks are never selected but keep their state.
    #[serde(default)]
    pub paused: bool,
    /// Whether automatic shuffles may pick this task. Manual shuffles
    /// ignore this flag.
    #[serde(default = "default_true")]
    pub auto_shuffle_allowed: bool,
    #[serde(default)]
    pub cut_in_line: CutInLine,
    #[serde(default)]
    pub timer_override: Option<TimerOverride>,

    // Lifecycle fields. See lifecycle::is_valid_state for the
    // population rules per status.
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When a repeating task should auto-resume to Active.
    #[serde(default)]
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// Last completion time, drives repeat urgency.
    #[serde(default)]
    pub last_done_at: Option<DateTime<Utc>>,

    // Sync metadata.
    /// Strictly increasing per persisted mutation. Primary conflict key.
    #[serde(default)]
    pub event_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_size_points() -> f64 {
    3.0
}

fn default_true() -> bool {
    true
}

impl Task {
    /// Create a new device-scoped active task with default values.
    pub fn new(title: impl Into<String>, owner: Owner) -> Self {
        let now = Utc::now();
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            title: title.into(),
            description: None,
            importance: 3,
            size_points: 3.0,
            deadline: None,
            repeat: RepeatRule::None,
            allowed_period: AllowedPeriod::Any,
            paused: false,
            auto_shuffle_allowed: true,
            cut_in_line: CutInLine::None,
            timer_override: None,
            status: TaskStatus::Active,
            snoozed_until: None,
            completed_at: None,
            next_eligible_at: None,
            last_done_at: None,
            event_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump sync metadata after a local mutation. Call exactly once per
    /// persisted change.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.event_version += 1;
        self.updated_at = now;
    }

    /// Whether this record should replace `other` under last-writer-wins.
    /// Version is primary; `updated_at` breaks version ties. Equal on
    /// both means the records are the same mutation -- a no-op.
    pub fn supersedes(&self, other: &Task) -> bool {
        self.event_version > other.event_version
            || (self.event_version == other.event_version && self.updated_at > other.updated_at)
    }
}
