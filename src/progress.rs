//! Progress aggregator — the composite recovery score for a connection.
//!
//! The score blends three signals:
//!   - consistency: how many distinct days in the past week carried activity,
//!     as `min(round(days / 7 * 100), 100)`, weighted 0.4;
//!   - completion rate: completed tasks over total tasks (video plus manual,
//!     both kinds), unrounded, weighted 0.3;
//!   - pain score: `clamp((11 - latest_pain) * 10, 0, 100)` with a neutral
//!     default of 5 when no reading exists, weighted 0.3.
//!
//! The blend is rounded once at the end. A brand-new connection therefore
//! scores 18: all zeros except the neutral pain default (60 * 0.3).
//!
//! The computation itself is pure over a snapshot; the database-facing entry
//! point reads through the scheduler and reconciler so lazy resets and
//! duplicate repair have already run on the data it aggregates.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::directory::User;
use crate::models::ManualTaskStatus;
use crate::reconciler::{self, PatientUpdate};
use crate::registry;
use crate::scheduler::{self, AssignedTask, ManualTask, SchedulerError};

const WEIGHT_CONSISTENCY: f64 = 0.4;
const WEIGHT_COMPLETION: f64 = 0.3;
const WEIGHT_PAIN: f64 = 0.3;

/// Neutral pain level assumed when the patient has never reported one.
const DEFAULT_PAIN_LEVEL: i32 = 5;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Actor is not a party to this connection")]
    Unauthorized,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<SchedulerError> for ProgressError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ConnectionNotFound => ProgressError::ConnectionNotFound,
            SchedulerError::Unauthorized => ProgressError::Unauthorized,
            SchedulerError::Database(e) => ProgressError::Database(e),
            SchedulerError::NotFound | SchedulerError::Validation(_) => {
                ProgressError::ConnectionNotFound
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub recovery_score: u32,
    pub pain_trend: Vec<TrendPoint>,
    pub stats: ProgressStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// UTC calendar day of the reading, `YYYY-MM-DD`.
    pub date: String,
    pub value: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    pub tasks_completed: usize,
    pub total_tasks: usize,
    pub exercises_completed: usize,
    pub total_exercises: usize,
    /// Display string, e.g. `"43% this week"`.
    pub consistency: String,
}

/// Everything the score depends on, read at one point in time.
#[derive(Debug, Default)]
pub struct ProgressSnapshot {
    pub video_tasks: Vec<AssignedTask>,
    pub manual_tasks: Vec<ManualTask>,
    /// All updates for the connection, any pain level, any order.
    pub updates: Vec<PatientUpdate>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Compute the progress report for a connection. Reads go through the
/// scheduler and reconciler, so task resets and duplicate repair are applied
/// before aggregation.
pub fn connection_progress(
    conn: &Connection,
    connection_id: &str,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<ProgressReport, ProgressError> {
    let connection = registry::get_connection(conn, connection_id)?
        .ok_or(ProgressError::ConnectionNotFound)?;
    if !registry::is_authorized_party(&connection, actor) {
        return Err(ProgressError::Unauthorized);
    }

    let snapshot = ProgressSnapshot {
        video_tasks: scheduler::list_video_tasks(conn, connection_id, now)?,
        manual_tasks: scheduler::list_manual_tasks(conn, connection_id, now)?,
        updates: reconciler::list_updates(conn, connection_id)?,
    };
    Ok(compute_progress(&snapshot, now))
}

// ---------------------------------------------------------------------------
// Pure computation
// ---------------------------------------------------------------------------

pub fn compute_progress(snapshot: &ProgressSnapshot, now: DateTime<Utc>) -> ProgressReport {
    let pain_trend = pain_trend(&snapshot.updates);
    let consistency = consistency_percent(&snapshot.updates, now);
    let completion = completion_rate(snapshot);
    let latest_pain = pain_trend
        .last()
        .map(|p| p.value)
        .unwrap_or(DEFAULT_PAIN_LEVEL);
    let pain = pain_score(latest_pain);

    let recovery_score = (f64::from(consistency) * WEIGHT_CONSISTENCY
        + completion * WEIGHT_COMPLETION
        + f64::from(pain) * WEIGHT_PAIN)
        .round() as u32;

    // Display naming: "exercises" are the video assignments, "tasks" the
    // manual ones.
    let exercises_completed = snapshot
        .video_tasks
        .iter()
        .filter(|t| t.is_completed)
        .count();
    let tasks_completed = snapshot
        .manual_tasks
        .iter()
        .filter(|t| t.status == ManualTaskStatus::Completed)
        .count();

    ProgressReport {
        recovery_score,
        pain_trend,
        stats: ProgressStats {
            tasks_completed,
            total_tasks: snapshot.manual_tasks.len(),
            exercises_completed,
            total_exercises: snapshot.video_tasks.len(),
            consistency: format!("{consistency}% this week"),
        },
    }
}

/// Pain readings in chronological order, one point per row.
fn pain_trend(updates: &[PatientUpdate]) -> Vec<TrendPoint> {
    let mut readings: Vec<&PatientUpdate> =
        updates.iter().filter(|u| u.has_pain_reading()).collect();
    readings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    readings
        .iter()
        .map(|u| TrendPoint {
            date: u.created_at.format("%Y-%m-%d").to_string(),
            value: u.pain_level,
        })
        .collect()
}

/// Distinct UTC days with any update activity in the trailing 7 days, scaled
/// to a percentage and capped at 100.
fn consistency_percent(updates: &[PatientUpdate], now: DateTime<Utc>) -> u32 {
    let window_start = now - Duration::days(7);
    let days: HashSet<_> = updates
        .iter()
        .filter(|u| u.created_at > window_start && u.created_at <= now)
        .map(|u| u.created_at.date_naive())
        .collect();
    let percent = (days.len() as f64 / 7.0 * 100.0).round() as u32;
    percent.min(100)
}

/// Completed over total across both task catalogs. Unrounded; zero when
/// nothing is assigned.
fn completion_rate(snapshot: &ProgressSnapshot) -> f64 {
    let total = snapshot.video_tasks.len() + snapshot.manual_tasks.len();
    if total == 0 {
        return 0.0;
    }
    let completed = snapshot
        .video_tasks
        .iter()
        .filter(|t| t.is_completed)
        .count()
        + snapshot
            .manual_tasks
            .iter()
            .filter(|t| t.status == ManualTaskStatus::Completed)
            .count();
    completed as f64 / total as f64 * 100.0
}

fn pain_score(latest_pain: i32) -> u32 {
    ((11 - latest_pain) * 10).clamp(0, 100) as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ManualTaskType, TaskFrequency};
    use crate::reconciler::PAIN_LEVEL_NONE;

    fn video(completed: bool) -> AssignedTask {
        AssignedTask {
            id: uuid::Uuid::new_v4().to_string(),
            connection_id: "c".into(),
            video_id: "v".into(),
            video_title: None,
            youtube_id: None,
            frequency_hours: 24,
            reset_interval_seconds: 86_400,
            last_completed_at: completed.then(Utc::now),
            is_completed: completed,
            created_at: Utc::now(),
        }
    }

    fn manual(kind: ManualTaskType, status: ManualTaskStatus) -> ManualTask {
        ManualTask {
            id: uuid::Uuid::new_v4().to_string(),
            connection_id: "c".into(),
            doctor_id: "d".into(),
            title: "Stretch".into(),
            description: None,
            kind,
            frequency: TaskFrequency::Daily,
            reminder_interval: 24,
            status,
            last_completed_at: None,
            created_at: Utc::now(),
        }
    }

    fn update(pain: i32, created_at: DateTime<Utc>) -> PatientUpdate {
        PatientUpdate {
            id: uuid::Uuid::new_v4().to_string(),
            connection_id: "c".into(),
            pain_level: pain,
            note: None,
            files: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn empty_connection_scores_the_neutral_baseline() {
        let report = compute_progress(&ProgressSnapshot::default(), Utc::now());
        // 0 * 0.4 + 0 * 0.3 + 60 * 0.3
        assert_eq!(report.recovery_score, 18);
        assert!(report.pain_trend.is_empty());
        assert_eq!(report.stats.total_tasks, 0);
        assert_eq!(report.stats.consistency, "0% this week");
    }

    #[test]
    fn blend_matches_the_worked_example() {
        let now = Utc::now();
        let snapshot = ProgressSnapshot {
            video_tasks: vec![video(true), video(false)],
            manual_tasks: vec![manual(ManualTaskType::Exercise, ManualTaskStatus::Completed)],
            updates: vec![
                update(6, now - Duration::days(3)),
                update(PAIN_LEVEL_NONE, now - Duration::days(2)),
                update(4, now - Duration::days(1)),
            ],
        };
        let report = compute_progress(&snapshot, now);
        // consistency: 3 active days -> round(3/7*100) = 43
        // completion: 2 of 3 -> 66.67 unrounded
        // pain: latest 4 -> 70
        // 43*0.4 + 66.67*0.3 + 70*0.3 = 58.2 -> 58
        assert_eq!(report.recovery_score, 58);
        assert_eq!(report.stats.consistency, "43% this week");
        assert_eq!(report.stats.exercises_completed, 1);
        assert_eq!(report.stats.total_exercises, 2);
        assert_eq!(report.stats.tasks_completed, 1);
        assert_eq!(report.stats.total_tasks, 1);
    }

    #[test]
    fn pain_trend_is_chronological_and_skips_sentinels() {
        let now = Utc::now();
        let snapshot = ProgressSnapshot {
            updates: vec![
                update(3, now - Duration::days(1)),
                update(PAIN_LEVEL_NONE, now - Duration::days(2)),
                update(8, now - Duration::days(5)),
            ],
            ..Default::default()
        };
        let report = compute_progress(&snapshot, now);
        let values: Vec<i32> = report.pain_trend.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![8, 3]);
    }

    #[test]
    fn consistency_counts_distinct_days_and_caps_at_100() {
        let now = Utc::now();
        // Two updates on the same day count once.
        let same_day = ProgressSnapshot {
            updates: vec![
                update(PAIN_LEVEL_NONE, now - Duration::hours(1)),
                update(PAIN_LEVEL_NONE, now - Duration::hours(2)),
            ],
            ..Default::default()
        };
        let report = compute_progress(&same_day, now);
        // round(1/7*100) = 14
        assert_eq!(report.stats.consistency, "14% this week");

        // Seven-plus distinct days cap out.
        let busy = ProgressSnapshot {
            updates: (0..7)
                .map(|d| update(PAIN_LEVEL_NONE, now - Duration::days(d) - Duration::hours(1)))
                .collect(),
            ..Default::default()
        };
        let report = compute_progress(&busy, now);
        assert_eq!(report.stats.consistency, "100% this week");
    }

    #[test]
    fn old_activity_does_not_count_toward_consistency() {
        let now = Utc::now();
        let snapshot = ProgressSnapshot {
            updates: vec![update(5, now - Duration::days(10))],
            ..Default::default()
        };
        let report = compute_progress(&snapshot, now);
        assert_eq!(report.stats.consistency, "0% this week");
        // The old reading still feeds the pain score: (11-5)*10 = 60.
        assert_eq!(report.pain_trend.len(), 1);
    }

    #[test]
    fn pain_score_extremes_are_clamped() {
        let now = Utc::now();
        let worst = ProgressSnapshot {
            updates: vec![update(10, now - Duration::hours(1))],
            ..Default::default()
        };
        // consistency 14, completion 0, pain (11-10)*10 = 10
        // 14*0.4 + 0 + 10*0.3 = 8.6 -> 9
        assert_eq!(compute_progress(&worst, now).recovery_score, 9);

        let best = ProgressSnapshot {
            updates: vec![update(0, now - Duration::hours(1))],
            ..Default::default()
        };
        // pain (11-0)*10 = 110 -> clamped to 100
        // 14*0.4 + 0 + 100*0.3 = 35.6 -> 36
        assert_eq!(compute_progress(&best, now).recovery_score, 36);
    }

    #[test]
    fn instruction_tasks_count_toward_the_completion_rate() {
        let now = Utc::now();
        let snapshot = ProgressSnapshot {
            video_tasks: vec![video(true)],
            manual_tasks: vec![manual(ManualTaskType::Instruction, ManualTaskStatus::Pending)],
            ..Default::default()
        };
        let report = compute_progress(&snapshot, now);
        // completion: 1 of 2, the pending instruction counts like any task
        assert_eq!(report.stats.total_tasks, 1);
        assert_eq!(report.stats.tasks_completed, 0);
        // 0*0.4 + 50*0.3 + 60*0.3 = 33
        assert_eq!(report.recovery_score, 33);
    }
}
