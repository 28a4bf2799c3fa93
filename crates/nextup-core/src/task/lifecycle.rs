//! Lifecycle state machine for tasks.
//!
//! Legal transitions:
//!
//! ```text
//!   Active ────> Snoozed ────> Active
//!     |             |
//!     v             v
//!   Completed <─────+
//!       |
//!       v  (repeat auto-resume only)
//!     Active
//! ```
//!
//! Self-loops and Completed -> Snoozed are illegal. The auto-resume
//! sweep is the only path out of Completed.

use chrono::{DateTime, Datelike, Duration, Utc};

use super::{RepeatRule, Task, TaskStatus, TransitionError};

/// True for exactly the five legal status pairs.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Active, Snoozed)
            | (Active, Completed)
            | (Snoozed, Active)
            | (Snoozed, Completed)
            | (Completed, Active)
    )
}

/// Human-readable audit label for a transition. Illegal pairs get a
/// generic label; callers must still reject the mutation.
pub fn transition_label(from: TaskStatus, to: TaskStatus) -> &'static str {
    use TaskStatus::*;
    match (from, to) {
        (Active, Snoozed) => "Task snoozed",
        (Active, Completed) => "Task completed",
        (Snoozed, Active) => "Task auto-resumed from snooze",
        (Snoozed, Completed) => "Snoozed task completed",
        (Completed, Active) => "Repeating task auto-resumed",
        _ => "Unknown transition",
    }
}

/// Validity predicate over the lifecycle fields at an evaluation instant.
///
/// A Snoozed task whose `snoozed_until` has passed is reported invalid:
/// that is the signal for [`auto_resume_sweep`] to fire, not a data
/// corruption.
pub fn is_valid_state(task: &Task, now: DateTime<Utc>) -> bool {
    match task.status {
        TaskStatus::Active => task.snoozed_until.is_none(),
        TaskStatus::Snoozed => match (task.snoozed_until, task.next_eligible_at) {
            (Some(until), Some(_)) => until > now,
            _ => false,
        },
        // next_eligible_at is optional: absent means non-repeating,
        // permanently done.
        TaskStatus::Completed => task.completed_at.is_some(),
    }
}

/// Mark a task completed, recording the completion and scheduling the
/// next resume point for repeating tasks.
pub fn complete(task: &mut Task, now: DateTime<Utc>) -> Result<&'static str, TransitionError> {
    let from = task.status;
    if !is_valid_transition(from, TaskStatus::Completed) {
        return Err(TransitionError { from, to: TaskStatus::Completed });
    }
    task.status = TaskStatus::Completed;
    task.completed_at = Some(now);
    task.snoozed_until = None;
    task.last_done_at = Some(now);
    task.next_eligible_at = next_eligible_after_completion(&task.repeat, now);
    task.touch(now);
    Ok(transition_label(from, TaskStatus::Completed))
}

/// Snooze an active task until `until`.
pub fn snooze(
    task: &mut Task,
    until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<&'static str, TransitionError> {
    let from = task.status;
    if !is_valid_transition(from, TaskStatus::Snoozed) {
        return Err(TransitionError { from, to: TaskStatus::Snoozed });
    }
    task.status = TaskStatus::Snoozed;
    task.snoozed_until = Some(until);
    task.next_eligible_at = Some(until);
    task.touch(now);
    Ok(transition_label(from, TaskStatus::Snoozed))
}

/// Manually bring a Snoozed or Completed task back to Active,
/// discarding any pending resume point.
pub fn resume(task: &mut Task, now: DateTime<Utc>) -> Result<&'static str, TransitionError> {
    let from = task.status;
    if !is_valid_transition(from, TaskStatus::Active) {
        return Err(TransitionError { from, to: TaskStatus::Active });
    }
    task.status = TaskStatus::Active;
    task.snoozed_until = None;
    task.completed_at = None;
    task.next_eligible_at = None;
    task.touch(now);
    Ok(transition_label(from, TaskStatus::Active))
}

/// Compute the next resume point after a completion at `done_at`.
///
/// Daily: +N days from the completion. Weekly: next matching weekday at
/// the rule's fixed time of day. Interval: +N days from the completion.
/// Non-repeating tasks never resume.
pub fn next_eligible_after_completion(
    repeat: &RepeatRule,
    done_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match repeat {
        RepeatRule::None => None,
        RepeatRule::Daily { every_days } | RepeatRule::Interval { every_days } => {
            Some(done_at + Duration::days((*every_days).max(1) as i64))
        }
        RepeatRule::Weekly { weekdays, at } => {
            if weekdays.is_empty() {
                return None;
            }
            // Scan forward from tomorrow; a weekly task never resumes
            // the same day it was completed.
            for offset in 1..=7 {
                let day = done_at.date_naive() + Duration::days(offset);
                if weekdays.contains(&day.weekday()) {
                    return Some(day.and_time(*at).and_utc());
                }
            }
            None
        }
    }
}

/// Resume every Snoozed or Completed task whose `next_eligible_at` has
/// passed. Returns the ids of the tasks that changed; callers persist
/// and broadcast them.
pub fn auto_resume_sweep(tasks: &mut [Task], now: DateTime<Utc>) -> Vec<String> {
    let mut resumed = Vec::new();
    for task in tasks.iter_mut() {
        let due = matches!(task.status, TaskStatus::Snoozed | TaskStatus::Completed)
            && task.next_eligible_at.is_some_and(|at| at <= now);
        if !due {
            continue;
        }
        let from = task.status;
        task.status = TaskStatus::Active;
        task.snoozed_until = None;
        task.completed_at = None;
        // The consumed resume point is replaced by the *next future*
        // one for repeating tasks, or cleared for one-shots.
        task.next_eligible_at = task
            .last_done_at
            .and_then(|done| next_eligible_after_completion(&task.repeat, done))
            .filter(|at| *at > now);
        task.touch(now);
        tracing::info!(task = %task.id, "{}", transition_label(from, TaskStatus::Active));
        resumed.push(task.id.clone());
    }
    resumed
}
