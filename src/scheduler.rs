//! Task scheduler — recurring video and manual tasks with lazy resets.
//!
//! There is no background job: staleness is resolved at read time. Each list
//! operation runs the pure reset policy over the rows it is about to return
//! and persists any flips back to pending before responding, so callers
//! always observe a reconciled view.
//!
//! The policies themselves are pure functions of a task and a clock reading,
//! which keeps the temporal logic testable without touching the database.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::directory::User;
use crate::models::{ManualTaskStatus, ManualTaskType, TaskFrequency};
use crate::registry::{self, StoredConnection};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Task not found")]
    NotFound,

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Actor is not a party to this task's connection")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(err: rusqlite::Error) -> Self {
        SchedulerError::Database(err.into())
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A video exercise assigned to a connection, recurring on a fixed interval.
#[derive(Debug, Clone, Serialize)]
pub struct AssignedTask {
    pub id: String,
    pub connection_id: String,
    pub video_id: String,
    pub video_title: Option<String>,
    pub youtube_id: Option<String>,
    pub frequency_hours: i64,
    pub reset_interval_seconds: i64,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl AssignedTask {
    /// Effective reset interval; `frequency_hours` is the fallback for rows
    /// written before the interval column carried real values.
    pub fn reset_interval(&self) -> Duration {
        if self.reset_interval_seconds > 0 {
            Duration::seconds(self.reset_interval_seconds)
        } else {
            Duration::hours(self.frequency_hours.max(1))
        }
    }
}

/// A free-form exercise or instruction created by the doctor.
#[derive(Debug, Clone, Serialize)]
pub struct ManualTask {
    pub id: String,
    pub connection_id: String,
    pub doctor_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ManualTaskType,
    pub frequency: TaskFrequency,
    pub reminder_interval: i64,
    pub status: ManualTaskStatus,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewAssignedTask {
    pub video_id: String,
    pub video_title: Option<String>,
    pub youtube_id: Option<String>,
    #[serde(default = "default_frequency_hours")]
    pub frequency_hours: i64,
    pub reset_interval_seconds: Option<i64>,
}

fn default_frequency_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize)]
pub struct NewManualTask {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ManualTaskType,
    pub frequency: TaskFrequency,
    #[serde(default = "default_frequency_hours")]
    pub reminder_interval: i64,
}

// ---------------------------------------------------------------------------
// Reset policies (pure)
// ---------------------------------------------------------------------------

/// Whether a completed video task has aged past its interval and should flip
/// back to pending. Strictly past: a read at exactly the boundary leaves the
/// task completed.
pub fn video_task_due_for_reset(task: &AssignedTask, now: DateTime<Utc>) -> bool {
    if !task.is_completed {
        return false;
    }
    let Some(completed_at) = task.last_completed_at else {
        return false;
    };
    now > completed_at + task.reset_interval()
}

/// Whether a completed manual task should flip back to pending: at or past
/// 24h for daily tasks, 48h for alternate-days.
pub fn manual_task_due_for_reset(task: &ManualTask, now: DateTime<Utc>) -> bool {
    if task.status != ManualTaskStatus::Completed {
        return false;
    }
    let Some(completed_at) = task.last_completed_at else {
        return false;
    };
    now - completed_at >= Duration::hours(task.frequency.reset_after_hours())
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Assign a video task to a connection. Only the connection's doctor may do
/// this.
pub fn assign_video_task(
    conn: &Connection,
    connection_id: &str,
    doctor: &User,
    new: &NewAssignedTask,
) -> Result<AssignedTask, SchedulerError> {
    if new.video_id.trim().is_empty() {
        return Err(SchedulerError::Validation("video_id is required".into()));
    }
    let connection = owned_connection(conn, connection_id, doctor)?;

    let id = Uuid::new_v4().to_string();
    let reset_interval = new
        .reset_interval_seconds
        .unwrap_or(new.frequency_hours.max(1) * 3600);
    conn.execute(
        "INSERT INTO assigned_tasks
         (id, connection_id, video_id, video_title, youtube_id, frequency_hours,
          reset_interval_seconds, last_completed_at, is_completed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 0, ?8)",
        params![
            id,
            connection.id,
            new.video_id,
            new.video_title,
            new.youtube_id,
            new.frequency_hours,
            reset_interval,
            Utc::now(),
        ],
    )?;

    get_video_task(conn, &id)?.ok_or(SchedulerError::NotFound)
}

/// Create a manual task on a connection. Only the connection's doctor may do
/// this.
pub fn create_manual_task(
    conn: &Connection,
    connection_id: &str,
    doctor: &User,
    new: &NewManualTask,
) -> Result<ManualTask, SchedulerError> {
    if new.title.trim().is_empty() {
        return Err(SchedulerError::Validation("title is required".into()));
    }
    let connection = owned_connection(conn, connection_id, doctor)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO manual_tasks
         (id, connection_id, doctor_id, title, description, type, frequency,
          reminder_interval, status, last_completed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', NULL, ?9)",
        params![
            id,
            connection.id,
            connection.doctor_id,
            new.title,
            new.description,
            new.kind.as_str(),
            new.frequency.as_str(),
            new.reminder_interval,
            Utc::now(),
        ],
    )?;

    get_manual_task(conn, &id)?.ok_or(SchedulerError::NotFound)
}

fn owned_connection(
    conn: &Connection,
    connection_id: &str,
    doctor: &User,
) -> Result<StoredConnection, SchedulerError> {
    let connection = registry::get_connection(conn, connection_id)?
        .ok_or(SchedulerError::ConnectionNotFound)?;
    if !registry::doctor_matches(&connection.doctor_id, doctor) {
        return Err(SchedulerError::Unauthorized);
    }
    Ok(connection)
}

// ---------------------------------------------------------------------------
// Reads (reconciling)
// ---------------------------------------------------------------------------

/// Video tasks for a connection with the reset policy applied. Tasks that
/// aged past their interval are flipped back to pending and persisted before
/// being returned.
pub fn list_video_tasks(
    conn: &Connection,
    connection_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AssignedTask>, SchedulerError> {
    let mut tasks = fetch_video_tasks(conn, connection_id)?;
    for task in &mut tasks {
        if video_task_due_for_reset(task, now) {
            conn.execute(
                "UPDATE assigned_tasks SET is_completed = 0, last_completed_at = NULL WHERE id = ?1",
                params![task.id],
            )?;
            task.is_completed = false;
            task.last_completed_at = None;
        }
    }
    Ok(tasks)
}

/// Manual tasks for a connection with the reset policy applied and persisted.
pub fn list_manual_tasks(
    conn: &Connection,
    connection_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ManualTask>, SchedulerError> {
    let mut tasks = fetch_manual_tasks(conn, connection_id)?;
    for task in &mut tasks {
        if manual_task_due_for_reset(task, now) {
            conn.execute(
                "UPDATE manual_tasks SET status = 'pending', last_completed_at = NULL WHERE id = ?1",
                params![task.id],
            )?;
            task.status = ManualTaskStatus::Pending;
            task.last_completed_at = None;
        }
    }
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Mark a video task completed. The actor must be a party to the task's
/// connection.
pub fn complete_video_task(
    conn: &Connection,
    task_id: &str,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<AssignedTask, SchedulerError> {
    let task = get_video_task(conn, task_id)?.ok_or(SchedulerError::NotFound)?;
    authorize_party(conn, &task.connection_id, actor)?;

    conn.execute(
        "UPDATE assigned_tasks SET is_completed = 1, last_completed_at = ?2 WHERE id = ?1",
        params![task.id, now],
    )?;
    get_video_task(conn, task_id)?.ok_or(SchedulerError::NotFound)
}

/// Mark a manual task completed. The actor must be a party to the task's
/// connection.
pub fn complete_manual_task(
    conn: &Connection,
    task_id: &str,
    actor: &User,
    now: DateTime<Utc>,
) -> Result<ManualTask, SchedulerError> {
    let task = get_manual_task(conn, task_id)?.ok_or(SchedulerError::NotFound)?;
    authorize_party(conn, &task.connection_id, actor)?;

    conn.execute(
        "UPDATE manual_tasks SET status = 'completed', last_completed_at = ?2 WHERE id = ?1",
        params![task.id, now],
    )?;
    get_manual_task(conn, task_id)?.ok_or(SchedulerError::NotFound)
}

fn authorize_party(
    conn: &Connection,
    connection_id: &str,
    actor: &User,
) -> Result<(), SchedulerError> {
    let connection = registry::get_connection(conn, connection_id)?
        .ok_or(SchedulerError::ConnectionNotFound)?;
    if !registry::is_authorized_party(&connection, actor) {
        return Err(SchedulerError::Unauthorized);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bulk operations
// ---------------------------------------------------------------------------

/// Reset all video tasks on a connection to pending. Doctor-only; used when
/// restarting a treatment cycle. Manual tasks are left alone.
pub fn reset_all_progress(
    conn: &Connection,
    connection_id: &str,
    doctor: &User,
) -> Result<usize, SchedulerError> {
    let connection = owned_connection(conn, connection_id, doctor)?;
    let reset = conn.execute(
        "UPDATE assigned_tasks SET is_completed = 0, last_completed_at = NULL
         WHERE connection_id = ?1",
        params![connection.id],
    )?;
    Ok(reset)
}

/// Delete video tasks by id. Ids that do not exist or whose connection is not
/// owned by this doctor are skipped silently; the count of rows actually
/// deleted is returned.
pub fn delete_video_tasks(
    conn: &Connection,
    task_ids: &[String],
    doctor: &User,
) -> Result<usize, SchedulerError> {
    let mut deleted = 0;
    for task_id in task_ids {
        let Some(task) = get_video_task(conn, task_id)? else {
            continue;
        };
        let Some(connection) = registry::get_connection(conn, &task.connection_id)? else {
            continue;
        };
        if !registry::doctor_matches(&connection.doctor_id, doctor) {
            continue;
        }
        deleted += conn.execute("DELETE FROM assigned_tasks WHERE id = ?1", params![task.id])?;
    }
    Ok(deleted)
}

/// Delete manual tasks by id with the same skip-unowned semantics as
/// [`delete_video_tasks`].
pub fn delete_manual_tasks(
    conn: &Connection,
    task_ids: &[String],
    doctor: &User,
) -> Result<usize, SchedulerError> {
    let mut deleted = 0;
    for task_id in task_ids {
        let Some(task) = get_manual_task(conn, task_id)? else {
            continue;
        };
        let Some(connection) = registry::get_connection(conn, &task.connection_id)? else {
            continue;
        };
        if !registry::doctor_matches(&connection.doctor_id, doctor) {
            continue;
        }
        deleted += conn.execute("DELETE FROM manual_tasks WHERE id = ?1", params![task.id])?;
    }
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub fn get_video_task(
    conn: &Connection,
    id: &str,
) -> Result<Option<AssignedTask>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("{VIDEO_TASK_SELECT} WHERE id = ?1"),
            params![id],
            video_task_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_manual_task(
    conn: &Connection,
    id: &str,
) -> Result<Option<ManualTask>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("{MANUAL_TASK_SELECT} WHERE id = ?1"),
            params![id],
            manual_task_row,
        )
        .optional()?;
    match row {
        Some(r) => Ok(Some(manual_task_from_row(r)?)),
        None => Ok(None),
    }
}

fn fetch_video_tasks(
    conn: &Connection,
    connection_id: &str,
) -> Result<Vec<AssignedTask>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIDEO_TASK_SELECT} WHERE connection_id = ?1 ORDER BY created_at"
    ))?;
    let rows = stmt.query_map(params![connection_id], video_task_row)?;
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }
    Ok(tasks)
}

fn fetch_manual_tasks(
    conn: &Connection,
    connection_id: &str,
) -> Result<Vec<ManualTask>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{MANUAL_TASK_SELECT} WHERE connection_id = ?1 ORDER BY created_at"
    ))?;
    let rows = stmt.query_map(params![connection_id], manual_task_row)?;
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(manual_task_from_row(row?)?);
    }
    Ok(tasks)
}

const VIDEO_TASK_SELECT: &str = "SELECT id, connection_id, video_id, video_title, youtube_id,
     frequency_hours, reset_interval_seconds, last_completed_at, is_completed, created_at
     FROM assigned_tasks";

const MANUAL_TASK_SELECT: &str = "SELECT id, connection_id, doctor_id, title, description, type,
     frequency, reminder_interval, status, last_completed_at, created_at
     FROM manual_tasks";

fn video_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssignedTask> {
    Ok(AssignedTask {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        video_id: row.get(2)?,
        video_title: row.get(3)?,
        youtube_id: row.get(4)?,
        frequency_hours: row.get(5)?,
        reset_interval_seconds: row.get(6)?,
        last_completed_at: row.get(7)?,
        is_completed: row.get::<_, i32>(8)? != 0,
        created_at: row.get(9)?,
    })
}

struct ManualTaskRow {
    id: String,
    connection_id: String,
    doctor_id: String,
    title: String,
    description: Option<String>,
    kind: String,
    frequency: String,
    reminder_interval: i64,
    status: String,
    last_completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

fn manual_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ManualTaskRow> {
    Ok(ManualTaskRow {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        doctor_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        kind: row.get(5)?,
        frequency: row.get(6)?,
        reminder_interval: row.get(7)?,
        status: row.get(8)?,
        last_completed_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn manual_task_from_row(row: ManualTaskRow) -> Result<ManualTask, DatabaseError> {
    use std::str::FromStr;
    Ok(ManualTask {
        id: row.id,
        connection_id: row.connection_id,
        doctor_id: row.doctor_id,
        title: row.title,
        description: row.description,
        kind: ManualTaskType::from_str(&row.kind)?,
        frequency: TaskFrequency::from_str(&row.frequency)?,
        reminder_interval: row.reminder_interval,
        status: ManualTaskStatus::from_str(&row.status)?,
        last_completed_at: row.last_completed_at,
        created_at: row.created_at,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
