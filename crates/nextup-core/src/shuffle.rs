//! Shuffle coordinator: runs the pick-and-countdown loop.
//!
//! The timer is wall-clock based. Starting a countdown persists the
//! expiry timestamp and schedules a deferred notification for that
//! instant; no in-memory timer thread is kept. If the process dies and
//! restarts, [`ShuffleCoordinator::tick`] re-derives the state from the
//! persisted snapshot and the clock, and the platform notifier still
//! fires the time-up alert.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bus::EventBus;
use crate::error::Result;
use crate::events::Event;
use crate::notify::Notifier;
use crate::period::time_until_next_boundary;
use crate::selector::{self, SelectionMode, ShuffleOrigin};
use crate::settings::AppSettings;
use crate::storage::{OwnerFilter, Storage};
use crate::task::{lifecycle, Task, TaskStatus, TimerMode};

/// Where the countdown currently is within the timer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum ShufflePhase {
    /// Working on the task. In pomodoro mode, `cycle` counts from 0.
    Focus { cycle: u32 },
    /// Pomodoro rest between focus blocks.
    Break { cycle: u32 },
}

/// Persisted state of an in-flight countdown. The expiry timestamp is
/// the source of truth; remaining time is always `expires_at - now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShuffleSnapshot {
    pub task_id: String,
    pub origin: ShuffleOrigin,
    /// Draw strategy of the session, reused by automatic redraws.
    #[serde(default)]
    pub mode: SelectionMode,
    pub phase: ShufflePhase,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ShuffleSnapshot {
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Observable coordinator state, derived from the snapshot and the
/// clock on every query.
#[derive(Debug, Clone, PartialEq)]
pub enum ShuffleState {
    Idle,
    CountingDown(ShuffleSnapshot),
    /// The countdown ran out and the session is waiting for the user
    /// to mark the task done or skip it.
    Expired(ShuffleSnapshot),
}

/// Drives shuffles, countdowns and the done/skip flows.
pub struct ShuffleCoordinator {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    bus: EventBus,
}

impl ShuffleCoordinator {
    pub fn new(storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>, bus: EventBus) -> Self {
        Self { storage, notifier, bus }
    }

    /// Run a shuffle: sweep auto-resumes, select a task, start its
    /// countdown. `now` carries the local offset; eligibility runs
    /// against the wall clock while every persisted timestamp is UTC.
    /// Returns the started task, or `None` when nothing was eligible
    /// (a break notice is emitted instead).
    pub async fn shuffle(
        &self,
        origin: ShuffleOrigin,
        mode: SelectionMode,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<Task>> {
        let instant = now.with_timezone(&Utc);
        let settings = self.storage.get_settings().await?;
        let periods = self.storage.get_periods().await?;
        let mut tasks = self.storage.get_tasks(OwnerFilter::All).await?;

        // Due snoozes and repeat resumes become Active before selection.
        for id in lifecycle::auto_resume_sweep(&mut tasks, instant) {
            if let Some(task) = tasks.iter().find(|t| t.id == id) {
                self.storage.upsert_task(task.clone()).await?;
                self.bus.publish(Event::TaskUpserted { task: task.clone() });
            }
        }

        let picked = match selector::pick_next(&tasks, &settings, now, origin, mode, &periods) {
            Some(task) => task.clone(),
            None => {
                self.notify_no_eligible(&tasks, &settings, &periods, now).await;
                return Ok(None);
            }
        };

        let mut picked = picked;
        if selector::consume_cut_in_line(&mut picked, instant) {
            self.storage.upsert_task(picked.clone()).await?;
            self.bus.publish(Event::TaskUpserted { task: picked.clone() });
        }

        let phase = ShufflePhase::Focus { cycle: 0 };
        let expires_at = instant + phase_duration(phase, &picked, &settings);
        let snapshot = ShuffleSnapshot {
            task_id: picked.id.clone(),
            origin,
            mode,
            phase,
            started_at: instant,
            expires_at,
        };
        self.storage.set_shuffle_snapshot(Some(snapshot.clone())).await?;

        if settings.notifications.enabled {
            self.notifier
                .schedule(
                    "Time's up",
                    &format!("Done with \"{}\"?", picked.title),
                    expires_at,
                    settings.notifications.play_sound,
                )
                .await;
        }

        tracing::info!(task = %picked.id, ?origin, %expires_at, "shuffle started");
        self.bus.publish(Event::TaskStarted {
            task_id: picked.id.clone(),
            origin,
            expires_at,
            at: instant,
        });
        self.bus.publish(Event::ShuffleStateChanged { snapshot: Some(snapshot), at: instant });
        Ok(Some(picked))
    }

    /// Current state, derived from the persisted snapshot and the clock.
    pub async fn state(&self, now: DateTime<FixedOffset>) -> Result<ShuffleState> {
        let instant = now.with_timezone(&Utc);
        match self.storage.get_shuffle_snapshot().await? {
            None => Ok(ShuffleState::Idle),
            Some(snap) if instant < snap.expires_at => Ok(ShuffleState::CountingDown(snap)),
            Some(snap) => Ok(ShuffleState::Expired(snap)),
        }
    }

    /// Advance the state machine past any expired phase. In pomodoro
    /// mode an expired focus block rolls into a break and an expired
    /// break rolls into the next focus cycle; the final expiry (or any
    /// plain-countdown expiry) clears the session and immediately draws
    /// again. The time-up alert itself was scheduled at session start,
    /// so a process restart between expiry and this tick loses nothing.
    pub async fn tick(&self, now: DateTime<FixedOffset>) -> Result<ShuffleState> {
        let instant = now.with_timezone(&Utc);
        let snap = match self.storage.get_shuffle_snapshot().await? {
            None => return Ok(ShuffleState::Idle),
            Some(snap) => snap,
        };
        if instant < snap.expires_at {
            return Ok(ShuffleState::CountingDown(snap));
        }

        let task = match self.storage.get_task(&snap.task_id).await? {
            Some(task) => task,
            None => {
                // Task deleted under a running countdown.
                self.clear(now).await?;
                return Ok(ShuffleState::Idle);
            }
        };
        let settings = self.storage.get_settings().await?;

        let next_phase = match (effective_mode(&task, &settings), snap.phase) {
            (TimerMode::Countdown, _) => None,
            (TimerMode::Pomodoro { .. }, ShufflePhase::Focus { cycle }) => {
                Some(ShufflePhase::Break { cycle })
            }
            (TimerMode::Pomodoro { cycles, .. }, ShufflePhase::Break { cycle }) => {
                if cycle + 1 < cycles {
                    Some(ShufflePhase::Focus { cycle: cycle + 1 })
                } else {
                    None
                }
            }
        };

        let Some(phase) = next_phase else {
            tracing::info!(task = %task.id, "countdown expired, drawing again");
            self.clear(now).await?;
            self.shuffle(snap.origin, snap.mode, now).await?;
            return self.state(now).await;
        };

        let expires_at = instant + phase_duration(phase, &task, &settings);
        let next = ShuffleSnapshot { phase, started_at: instant, expires_at, ..snap };
        self.storage.set_shuffle_snapshot(Some(next.clone())).await?;

        if settings.notifications.enabled {
            let (title, body) = match phase {
                ShufflePhase::Break { .. } => {
                    ("Focus block done", format!("Take a break from \"{}\"", task.title))
                }
                ShufflePhase::Focus { cycle } => {
                    ("Break over", format!("Back to \"{}\" (round {})", task.title, cycle + 1))
                }
            };
            self.notifier.show_now(title, &body, settings.notifications.play_sound).await;
            self.bus.publish(Event::NotificationBroadcasted {
                title: title.to_string(),
                body: body.clone(),
                at: instant,
            });
            self.notifier
                .schedule("Time's up", &format!("Done with \"{}\"?", task.title), expires_at, settings.notifications.play_sound)
                .await;
        }

        tracing::debug!(task = %task.id, ?phase, %expires_at, "phase advanced");
        self.bus.publish(Event::ShuffleStateChanged { snapshot: Some(next.clone()), at: instant });
        Ok(ShuffleState::CountingDown(next))
    }

    /// Mark the current task done: lifecycle-complete it, clear the
    /// countdown and draw the next task. Returns the completed task;
    /// the follow-up pick is observable through [`Self::state`] and the
    /// bus.
    pub async fn mark_done(
        &self,
        mode: SelectionMode,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<Task>> {
        let snap = match self.storage.get_shuffle_snapshot().await? {
            None => return Ok(None),
            Some(snap) => snap,
        };
        let mut task = match self.storage.get_task(&snap.task_id).await? {
            Some(task) => task,
            None => {
                self.clear(now).await?;
                return Ok(None);
            }
        };
        if task.status == TaskStatus::Active {
            lifecycle::complete(&mut task, now.with_timezone(&Utc))?;
            self.storage.upsert_task(task.clone()).await?;
            self.bus.publish(Event::TaskUpserted { task: task.clone() });
        }
        self.clear(now).await?;
        self.shuffle(snap.origin, mode, now).await?;
        Ok(Some(task))
    }

    /// Abandon the current pick and immediately draw again.
    pub async fn skip(
        &self,
        mode: SelectionMode,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<Task>> {
        let origin = match self.storage.get_shuffle_snapshot().await? {
            Some(snap) => {
                self.clear(now).await?;
                snap.origin
            }
            None => ShuffleOrigin::Manual,
        };
        self.shuffle(origin, mode, now).await
    }

    /// Drop the snapshot and announce the idle state.
    pub async fn clear(&self, now: DateTime<FixedOffset>) -> Result<()> {
        self.storage.set_shuffle_snapshot(None).await?;
        self.bus
            .publish(Event::ShuffleStateChanged { snapshot: None, at: now.with_timezone(&Utc) });
        Ok(())
    }

    /// "Nothing to do right now" notice, with the next window opening
    /// when one can be found. Suppressed during quiet hours and by the
    /// break-notice toggle.
    async fn notify_no_eligible(
        &self,
        tasks: &[Task],
        settings: &AppSettings,
        periods: &[crate::period::PeriodDefinition],
        now: DateTime<FixedOffset>,
    ) {
        if !settings.notifications.enabled || !settings.notifications.break_notices {
            return;
        }
        if let Some(quiet) = settings.quiet_hours {
            if quiet.contains(now.time()) {
                return;
            }
        }
        let next_window = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Active && !t.paused)
            .filter_map(|t| time_until_next_boundary(now.naive_local(), t, settings, periods))
            .min();
        let body = match next_window {
            Some(gap) => format!("Next task window opens in {} minutes", gap.num_minutes()),
            None => "No task is eligible right now".to_string(),
        };
        self.notifier.show_now("On a break", &body, false).await;
        self.bus.publish(Event::NotificationBroadcasted {
            title: "On a break".to_string(),
            body,
            at: now.with_timezone(&Utc),
        });
    }
}

/// Random delay before the next automatic shuffle, drawn uniformly from
/// the configured gap bounds.
pub fn next_auto_shuffle_gap(settings: &AppSettings) -> Duration {
    let min = settings.min_auto_shuffle_gap_minutes.max(1);
    let max = settings.max_auto_shuffle_gap_minutes.max(min);
    Duration::minutes(rand::thread_rng().gen_range(min..=max) as i64)
}

/// Resolve the timer mode for a task: per-task override first, then the
/// global setting.
fn effective_mode(task: &Task, settings: &AppSettings) -> TimerMode {
    task.timer_override
        .as_ref()
        .and_then(|o| o.mode)
        .unwrap_or(settings.timer_mode)
}

fn effective_reminder_minutes(task: &Task, settings: &AppSettings) -> u32 {
    task.timer_override
        .as_ref()
        .and_then(|o| o.reminder_minutes)
        .unwrap_or(settings.reminder_minutes)
}

fn phase_duration(phase: ShufflePhase, task: &Task, settings: &AppSettings) -> Duration {
    let minutes = match (effective_mode(task, settings), phase) {
        (TimerMode::Countdown, _) => effective_reminder_minutes(task, settings),
        (TimerMode::Pomodoro { focus_minutes, .. }, ShufflePhase::Focus { .. }) => focus_minutes,
        (TimerMode::Pomodoro { break_minutes, .. }, ShufflePhase::Break { .. }) => break_minutes,
    };
    Duration::minutes(minutes.max(1) as i64)
}
