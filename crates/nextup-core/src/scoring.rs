//! Priority scoring engine.
//!
//! Deterministic, pure: the same `(task, now, settings)` always yields
//! the same score. Importance and urgency split a 100-point budget; a
//! size multiplier biases the result toward (or away from) large tasks.
//!
//! ```text
//! importance_points = importance * (importance_weight / 5)
//! window_hours      = clamp(72 * size/3, 24, 168)
//! deadline_urgency  = 1 - clamp(hours_until_deadline / window_hours, 0, 1)
//! urgency_points    = urgency_weight * (share * deadline + (1-share) * repeat)
//! size_multiplier   = clamp(1 + bias * (size/3 - 1), 1-bias, 1+bias)
//! score             = (importance_points + urgency_points) * size_multiplier
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::settings::AppSettings;
use crate::task::Task;

/// Reference size: 3 story points gets a 72-hour deadline ramp.
const BASELINE_SIZE_POINTS: f64 = 3.0;
const BASELINE_WINDOW_HOURS: f64 = 72.0;
const MIN_WINDOW_HOURS: f64 = 24.0;
const MAX_WINDOW_HOURS: f64 = 168.0;

/// One named term of a score, kept for explainability. Serialize-only:
/// breakdowns are an output surface, never read back in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreTerm {
    pub name: &'static str,
    pub value: f64,
}

/// Full scoring breakdown for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub terms: Vec<ScoreTerm>,
    pub importance_points: f64,
    pub urgency_points: f64,
    pub size_multiplier: f64,
}

/// A task id paired with its computed score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTask {
    pub task_id: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Size points with the non-positive edge case folded to the default.
fn effective_size(size_points: f64) -> f64 {
    if size_points > 0.0 {
        size_points
    } else {
        BASELINE_SIZE_POINTS
    }
}

/// Deadline-urgency ramp width in hours. Larger tasks get a wider ramp
/// so they surface earlier.
pub fn window_hours(size_points: f64) -> f64 {
    let size = effective_size(size_points);
    (BASELINE_WINDOW_HOURS * size / BASELINE_SIZE_POINTS).clamp(MIN_WINDOW_HOURS, MAX_WINDOW_HOURS)
}

/// 0 when the deadline is at least `window_hours` away, ramping to 1 at
/// (and past) the deadline. No deadline means no deadline urgency.
pub fn deadline_urgency(task: &Task, now: DateTime<Utc>) -> f64 {
    let Some(deadline) = task.deadline else {
        return 0.0;
    };
    let hours_left = (deadline - now).num_minutes() as f64 / 60.0;
    let window = window_hours(task.size_points);
    1.0 - (hours_left / window).clamp(0.0, 1.0)
}

/// Repeat urgency grows with elapsed time since the last completion
/// relative to the cadence, damped by the configured penalty. A
/// repeating task that has never been done counts as fully due. The
/// streak bias boosts tasks with a completion history so a kept-up
/// habit keeps surfacing; the result stays within [0, 1].
pub fn repeat_urgency(task: &Task, now: DateTime<Utc>, settings: &AppSettings) -> f64 {
    let Some(cadence_days) = task.repeat.cadence_days() else {
        return 0.0;
    };
    let damping = 1.0 - settings.weights.repeat_urgency_penalty;
    match task.last_done_at {
        Some(done) => {
            let elapsed_days = (now - done).num_minutes() as f64 / (60.0 * 24.0);
            let raw = (elapsed_days / cadence_days).clamp(0.0, 1.0);
            let streak = settings.streak_bias.clamp(0.0, 1.0);
            (raw * damping * (1.0 + streak)).min(1.0)
        }
        None => damping,
    }
}

/// Size multiplier within `[1 - bias, 1 + bias]`.
pub fn size_multiplier(size_points: f64, bias_strength: f64) -> f64 {
    let bias = bias_strength.clamp(0.0, 1.0);
    let size = effective_size(size_points);
    (1.0 + bias * (size / BASELINE_SIZE_POINTS - 1.0)).clamp(1.0 - bias, 1.0 + bias)
}

/// Score one task. Weight shares are read pre-normalized from settings;
/// callers go through [`AppSettings::normalize`] on load.
pub fn score(task: &Task, now: DateTime<Utc>, settings: &AppSettings) -> ScoredTask {
    let weights = &settings.weights;
    let importance = (task.importance.clamp(1, 5)) as f64;
    let importance_points = importance * (weights.importance_weight / 5.0);

    let deadline = deadline_urgency(task, now);
    let repeat = repeat_urgency(task, now, settings);
    let deadline_share = weights.urgency_deadline_share / 100.0;
    let urgency_points =
        weights.urgency_weight * (deadline_share * deadline + (1.0 - deadline_share) * repeat);

    let multiplier = size_multiplier(task.size_points, settings.size_bias_strength);
    let final_score = (importance_points + urgency_points) * multiplier;

    ScoredTask {
        task_id: task.id.clone(),
        score: final_score,
        breakdown: ScoreBreakdown {
            terms: vec![
                ScoreTerm { name: "importance", value: importance_points },
                ScoreTerm { name: "deadline_urgency", value: deadline },
                ScoreTerm { name: "repeat_urgency", value: repeat },
                ScoreTerm { name: "size_multiplier", value: multiplier },
            ],
            importance_points,
            urgency_points,
            size_multiplier: multiplier,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Owner, RepeatRule};
    use chrono::Duration;
    use proptest::prelude::*;

    fn settings() -> AppSettings {
        let mut s = AppSettings::default();
        s.normalize();
        s
    }

    fn task() -> Task {
        Task::new("t", Owner::Device("dev-1".into()))
    }

    #[test]
    fn importance_five_with_twelve_hour_deadline_scores_85() {
        let now = Utc::now();
        let s = settings();

        let mut urgent = task();
        urgent.importance = 5;
        urgent.deadline = Some(now + Duration::hours(12));
        urgent.size_points = 3.0;

        assert_eq!(window_hours(urgent.size_points), 72.0);
        let du = deadline_urgency(&urgent, now);
        assert!((du - (1.0 - 12.0 / 72.0)).abs() < 1e-9);

        let mut dull = task();
        dull.importance = 1;
        dull.size_points = 3.0;

        let urgent_score = score(&urgent, now, &s);
        let dull_score = score(&dull, now, &s);
        // importance 60 + urgency 40*(0.75*0.8333) = 85 vs plain 12.
        assert!((urgent_score.score - 85.0).abs() < 1e-6);
        assert!((dull_score.score - 12.0).abs() < 1e-6);
        assert!(urgent_score.score > dull_score.score);
    }

    #[test]
    fn past_due_deadline_clamps_to_full_urgency() {
        let now = Utc::now();
        let mut t = task();
        t.deadline = Some(now - Duration::hours(5));
        assert_eq!(deadline_urgency(&t, now), 1.0);
    }

    #[test]
    fn no_deadline_means_zero_deadline_urgency() {
        assert_eq!(deadline_urgency(&task(), Utc::now()), 0.0);
    }

    #[test]
    fn window_widens_with_size_within_bounds() {
        assert_eq!(window_hours(3.0), 72.0);
        assert_eq!(window_hours(0.5), 24.0); // floor
        assert_eq!(window_hours(20.0), 168.0); // ceiling
        assert_eq!(window_hours(-1.0), 72.0); // bad size -> default
    }

    #[test]
    fn repeat_urgency_grows_with_elapsed_time() {
        let now = Utc::now();
        let s = settings();
        let mut t = task();
        t.repeat = RepeatRule::Daily { every_days: 2 };

        t.last_done_at = Some(now - Duration::hours(12));
        let fresh = repeat_urgency(&t, now, &s);
        t.last_done_at = Some(now - Duration::days(2));
        let due = repeat_urgency(&t, now, &s);
        assert!(due > fresh);
        // Damping keeps repeat urgency off the full 1.0.
        assert!((due - 0.5).abs() < 1e-9);
    }

    #[test]
    fn streak_bias_boosts_tasks_with_a_completion_history() {
        let now = Utc::now();
        let mut s = settings();
        let mut t = task();
        t.repeat = RepeatRule::Daily { every_days: 2 };
        t.last_done_at = Some(now - Duration::days(2));

        let flat = repeat_urgency(&t, now, &s);
        s.streak_bias = 0.4;
        let boosted = repeat_urgency(&t, now, &s);
        assert!((boosted - flat * 1.4).abs() < 1e-9);
        assert!(boosted <= 1.0);

        // Never-done tasks get no streak boost.
        t.last_done_at = None;
        let never = repeat_urgency(&t, now, &s);
        assert!((never - (1.0 - s.weights.repeat_urgency_penalty)).abs() < 1e-9);
    }

    #[test]
    fn never_done_repeating_task_is_fully_due() {
        let s = settings();
        let mut t = task();
        t.repeat = RepeatRule::Interval { every_days: 3 };
        let u = repeat_urgency(&t, Utc::now(), &s);
        assert!((u - (1.0 - s.weights.repeat_urgency_penalty)).abs() < 1e-9);
    }

    #[test]
    fn importance_outside_range_is_clamped() {
        let now = Utc::now();
        let s = settings();
        let mut t = task();
        t.importance = 11;
        let high = score(&t, now, &s);
        t.importance = 5;
        let five = score(&t, now, &s);
        assert_eq!(high.score, five.score);
    }

    #[test]
    fn breakdown_terms_are_named() {
        let scored = score(&task(), Utc::now(), &settings());
        let names: Vec<_> = scored.breakdown.terms.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["importance", "deadline_urgency", "repeat_urgency", "size_multiplier"]);
    }

    proptest! {
        #[test]
        fn score_is_deterministic(importance in 1i32..=5, size in 0.1f64..20.0, hours in 0i64..400) {
            let now = Utc::now();
            let s = settings();
            let mut t = task();
            t.importance = importance;
            t.size_points = size;
            t.deadline = Some(now + Duration::hours(hours));
            prop_assert_eq!(score(&t, now, &s).score, score(&t, now, &s).score);
        }

        #[test]
        fn score_monotone_in_importance(importance in 1i32..5, size in 0.1f64..20.0) {
            let now = Utc::now();
            let s = settings();
            let mut lo = task();
            lo.importance = importance;
            lo.size_points = size;
            let mut hi = lo.clone();
            hi.importance = importance + 1;
            prop_assert!(score(&hi, now, &s).score >= score(&lo, now, &s).score);
        }

        #[test]
        fn size_multiplier_stays_within_bias_bounds(size in 0.01f64..50.0, bias in 0.0f64..1.0) {
            let m = size_multiplier(size, bias);
            prop_assert!(m >= 1.0 - bias - 1e-9);
            prop_assert!(m <= 1.0 + bias + 1e-9);
        }
    }
}
