//! Task selection: filter, score, pick.
//!
//! Selection never mutates tasks. The one follow-up mutation -- clearing
//! a consumed `CutInLine::Once` -- is the caller's job via
//! [`consume_cut_in_line`], which is idempotent so re-reads of the same
//! pick cannot re-trigger it.

use chrono::{DateTime, FixedOffset, Utc};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use sha2::{Digest, Sha256};

use crate::period::{is_within_allowed_period, PeriodDefinition};
use crate::scoring::{score, ScoredTask};
use crate::settings::AppSettings;
use crate::task::{CutInLine, Task, TaskStatus};

/// Floor for draw weights so zero-score tasks stay selectable.
const WEIGHT_EPSILON: f64 = 1e-3;

/// What triggered the shuffle. Auto shuffles respect the per-task
/// `auto_shuffle_allowed` flag; manual shuffles bypass it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleOrigin {
    Auto,
    Manual,
}

/// Draw strategy. Deterministic mode exists for tests and
/// reproducibility debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    WeightedRandom,
    Deterministic,
}

/// Eligibility filter for one task. `now` carries the local offset:
/// window checks run against the wall clock, not UTC time-of-day.
///
/// Snoozed/Completed tasks are excluded even when their resume point
/// has passed -- auto-resume is the lifecycle sweep's job, run before
/// selection, never here.
pub fn is_eligible(
    task: &Task,
    origin: ShuffleOrigin,
    now: DateTime<FixedOffset>,
    settings: &AppSettings,
    periods: &[PeriodDefinition],
) -> bool {
    if task.status != TaskStatus::Active || task.paused {
        return false;
    }
    if origin == ShuffleOrigin::Auto && !task.auto_shuffle_allowed {
        return false;
    }
    let check_period =
        origin == ShuffleOrigin::Auto || settings.manual_shuffle_respects_allowed_period;
    if check_period && !is_within_allowed_period(task, now.naive_local(), settings, periods) {
        return false;
    }
    true
}

/// Pick the next task, or `None` when nothing is eligible (the caller
/// reschedules for the next window boundary).
pub fn pick_next<'a>(
    tasks: &'a [Task],
    settings: &AppSettings,
    now: DateTime<FixedOffset>,
    origin: ShuffleOrigin,
    mode: SelectionMode,
    periods: &[PeriodDefinition],
) -> Option<&'a Task> {
    let eligible: Vec<&Task> = tasks
        .iter()
        .filter(|t| is_eligible(t, origin, now, settings, periods))
        .collect();
    if eligible.is_empty() {
        return None;
    }

    // Cut-in-line short-circuits scoring entirely.
    if let Some(forced) = pick_cut_in_line(&eligible) {
        return Some(forced);
    }

    let instant = now.with_timezone(&Utc);
    let scored: Vec<ScoredTask> = eligible.iter().map(|t| score(t, instant, settings)).collect();
    let winner_id = match mode {
        SelectionMode::Deterministic => pick_max(&scored),
        SelectionMode::WeightedRandom => {
            let mut rng = draw_rng(settings, now);
            pick_weighted(&scored, &mut rng)
        }
    };
    eligible.into_iter().find(|t| t.id == winner_id)
}

/// Highest importance wins; ties break by earliest deadline, then by
/// position in the input set (insertion order).
fn pick_cut_in_line<'a>(eligible: &[&'a Task]) -> Option<&'a Task> {
    eligible
        .iter()
        .filter(|t| matches!(t.cut_in_line, CutInLine::Once | CutInLine::Sticky))
        .min_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| match (a.deadline, b.deadline) {
                    (Some(da), Some(db)) => da.cmp(&db),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
        })
        .copied()
}

fn pick_max(scored: &[ScoredTask]) -> String {
    let mut best = &scored[0];
    for s in &scored[1..] {
        let better = s.score > best.score || (s.score == best.score && s.task_id < best.task_id);
        if better {
            best = s;
        }
    }
    best.task_id.clone()
}

fn pick_weighted(scored: &[ScoredTask], rng: &mut Pcg64) -> String {
    let weights: Vec<f64> = scored.iter().map(|s| s.score.max(WEIGHT_EPSILON)).collect();
    let total: f64 = weights.iter().sum();
    let mut draw = rng.gen_range(0.0..total);
    for (s, w) in scored.iter().zip(&weights) {
        if draw < *w {
            return s.task_id.clone();
        }
        draw -= w;
    }
    // Floating-point remainder lands on the last entry.
    scored[scored.len() - 1].task_id.clone()
}

/// RNG for the weighted draw. With stable daily randomness on, the
/// seed is derived from the local calendar date plus device id so
/// repeated shuffles within one day agree (until the task set changes).
fn draw_rng(settings: &AppSettings, now: DateTime<FixedOffset>) -> Pcg64 {
    if settings.stable_daily_random {
        Pcg64::seed_from_u64(daily_seed(&now.date_naive().to_string(), &settings.network.device_id))
    } else {
        Pcg64::from_entropy()
    }
}

fn daily_seed(date: &str, device_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(date.as_bytes());
    hasher.update(device_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Clear a consumed one-shot override. Returns true when the task
/// changed (so the caller persists and broadcasts it).
pub fn consume_cut_in_line(task: &mut Task, now: DateTime<Utc>) -> bool {
    if task.cut_in_line == CutInLine::Once {
        task.cut_in_line = CutInLine::None;
        task.touch(now);
        true
    } else {
        false
    }
}
