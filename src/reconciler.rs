//! Update reconciler — patient progress updates with merge-on-submit and
//! read-time self-healing.
//!
//! A connection is meant to carry at most one submission row; pain level,
//! note, and files may arrive in separate requests and all merge into that
//! row rather than stacking new ones. Task-notice rows are flagged
//! `is_notice` and append-only, so a unique index cannot enforce the
//! one-submission shape. Historical races can still leave duplicate
//! pain-bearing rows behind, which is why every read path first runs
//! [`repair_duplicate_pain_updates`]: keep the newest pain row, delete the
//! rest, and log what was removed.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::directory::User;
use crate::registry;

pub const PAIN_LEVEL_MIN: i32 = 0;
pub const PAIN_LEVEL_MAX: i32 = 10;

/// Sentinel pain level for rows that carry no pain reading.
pub const PAIN_LEVEL_NONE: i32 = -1;

#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Actor is not a party to this connection")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for ReconcilerError {
    fn from(err: rusqlite::Error) -> Self {
        ReconcilerError::Database(err.into())
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PatientUpdate {
    pub id: String,
    pub connection_id: String,
    pub pain_level: i32,
    pub note: Option<String>,
    pub files: Vec<UpdateFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientUpdate {
    pub fn has_pain_reading(&self) -> bool {
        self.pain_level >= PAIN_LEVEL_MIN
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFile {
    pub id: String,
    pub original_name: String,
    pub stored_name: String,
    pub path: String,
    pub mime_type: String,
    pub position: i64,
}

/// Attachment metadata produced by the blob store on upload.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub original_name: String,
    pub stored_name: String,
    pub path: String,
    pub mime_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewUpdate {
    pub pain_level: Option<i32>,
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Submit a progress update. Only the connection's patient may submit.
/// Merges into the connection's existing submission row when one exists,
/// whether or not that row carries a pain reading yet: a supplied pain level
/// overwrites, a supplied note overwrites, files append. Absent fields leave
/// the stored values alone.
pub fn submit_update(
    conn: &Connection,
    connection_id: &str,
    actor: &User,
    new: &NewUpdate,
    files: &[NewFile],
) -> Result<PatientUpdate, ReconcilerError> {
    authorize_patient(conn, connection_id, actor)?;

    if let Some(pain) = new.pain_level {
        if !(PAIN_LEVEL_MIN..=PAIN_LEVEL_MAX).contains(&pain) {
            return Err(ReconcilerError::Validation(format!(
                "pain_level must be between {PAIN_LEVEL_MIN} and {PAIN_LEVEL_MAX}"
            )));
        }
    }

    let now = Utc::now();
    let existing = newest_submission(conn, connection_id)?;

    let update_id = match existing {
        Some(update) => {
            if let Some(pain) = new.pain_level {
                conn.execute(
                    "UPDATE patient_updates SET pain_level = ?2, updated_at = ?3 WHERE id = ?1",
                    params![update.id, pain, now],
                )?;
            }
            if let Some(note) = new.note.as_deref() {
                conn.execute(
                    "UPDATE patient_updates SET note = ?2, updated_at = ?3 WHERE id = ?1",
                    params![update.id, note, now],
                )?;
            }
            append_files(conn, &update.id, files)?;
            update.id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO patient_updates (id, connection_id, pain_level, note, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id,
                    connection_id,
                    new.pain_level.unwrap_or(PAIN_LEVEL_NONE),
                    new.note,
                    now,
                ],
            )?;
            append_files(conn, &id, files)?;
            id
        }
    };

    get_update(conn, &update_id)?.ok_or(ReconcilerError::ConnectionNotFound)
}

/// Record a task-completion notice as a standalone flagged row. Notices are
/// append-only and never become a merge target.
pub fn record_task_notice(
    conn: &Connection,
    connection_id: &str,
    actor: &User,
    note: &str,
) -> Result<PatientUpdate, ReconcilerError> {
    authorize_patient(conn, connection_id, actor)?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO patient_updates (id, connection_id, pain_level, note, is_notice, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
        params![id, connection_id, PAIN_LEVEL_NONE, note, now],
    )?;

    get_update(conn, &id)?.ok_or(ReconcilerError::ConnectionNotFound)
}

fn append_files(
    conn: &Connection,
    update_id: &str,
    files: &[NewFile],
) -> Result<(), DatabaseError> {
    if files.is_empty() {
        return Ok(());
    }
    let next_position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM update_files WHERE update_id = ?1",
        params![update_id],
        |row| row.get(0),
    )?;
    for (offset, file) in files.iter().enumerate() {
        conn.execute(
            "INSERT INTO update_files (id, update_id, original_name, stored_name, path, mime_type, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                update_id,
                file.original_name,
                file.stored_name,
                file.path,
                file.mime_type,
                next_position + offset as i64,
            ],
        )?;
    }
    Ok(())
}

fn authorize_patient(
    conn: &Connection,
    connection_id: &str,
    actor: &User,
) -> Result<(), ReconcilerError> {
    let connection = registry::get_connection(conn, connection_id)?
        .ok_or(ReconcilerError::ConnectionNotFound)?;
    if !registry::patient_matches(&connection.patient_id, actor) {
        return Err(ReconcilerError::Unauthorized);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Self-healing
// ---------------------------------------------------------------------------

/// Collapse duplicate pain rows on a connection down to the newest one.
/// Returns the ids of the rows removed; a clean connection returns an empty
/// vec, so running this repeatedly is harmless.
pub fn repair_duplicate_pain_updates(
    conn: &Connection,
    connection_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, pain_level FROM patient_updates
         WHERE connection_id = ?1 AND pain_level >= 0
         ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![connection_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?))
    })?;

    let mut pain_rows = Vec::new();
    for row in rows {
        pain_rows.push(row?);
    }
    if pain_rows.len() <= 1 {
        return Ok(Vec::new());
    }

    let (kept_id, kept_pain) = pain_rows[0].clone();
    let mut removed = Vec::new();
    for (id, pain) in pain_rows.into_iter().skip(1) {
        conn.execute("DELETE FROM patient_updates WHERE id = ?1", params![id])?;
        tracing::info!(
            connection_id,
            removed_id = %id,
            removed_pain = pain,
            kept_id = %kept_id,
            kept_pain,
            "removed duplicate pain update"
        );
        removed.push(id);
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Updates for a connection, newest first, after duplicate repair.
pub fn list_updates(
    conn: &Connection,
    connection_id: &str,
) -> Result<Vec<PatientUpdate>, DatabaseError> {
    repair_duplicate_pain_updates(conn, connection_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, connection_id, pain_level, note, created_at, updated_at
         FROM patient_updates WHERE connection_id = ?1
         ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![connection_id], update_row)?;

    let mut updates = Vec::new();
    for row in rows {
        let mut update = row?;
        update.files = fetch_files(conn, &update.id)?;
        updates.push(update);
    }
    Ok(updates)
}

/// Updates oldest-first with pain readings only; the aggregator's input.
pub fn pain_history(
    conn: &Connection,
    connection_id: &str,
) -> Result<Vec<PatientUpdate>, DatabaseError> {
    repair_duplicate_pain_updates(conn, connection_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, connection_id, pain_level, note, created_at, updated_at
         FROM patient_updates WHERE connection_id = ?1 AND pain_level >= 0
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![connection_id], update_row)?;

    let mut updates = Vec::new();
    for row in rows {
        updates.push(row?);
    }
    Ok(updates)
}

pub fn get_update(
    conn: &Connection,
    id: &str,
) -> Result<Option<PatientUpdate>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, connection_id, pain_level, note, created_at, updated_at
             FROM patient_updates WHERE id = ?1",
            params![id],
            update_row,
        )
        .optional()?;
    match row {
        Some(mut update) => {
            update.files = fetch_files(conn, &update.id)?;
            Ok(Some(update))
        }
        None => Ok(None),
    }
}

/// Delete all updates (and their attachment rows, via cascade) for a
/// connection. Returns the number of update rows removed.
pub fn clear_updates(conn: &Connection, connection_id: &str) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM patient_updates WHERE connection_id = ?1",
        params![connection_id],
    )?;
    Ok(removed)
}

/// The merge target: the newest non-notice row, whatever its pain level.
fn newest_submission(
    conn: &Connection,
    connection_id: &str,
) -> Result<Option<PatientUpdate>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, connection_id, pain_level, note, created_at, updated_at
             FROM patient_updates WHERE connection_id = ?1 AND is_notice = 0
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![connection_id],
            update_row,
        )
        .optional()?;
    Ok(row)
}

fn update_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatientUpdate> {
    Ok(PatientUpdate {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        pain_level: row.get(2)?,
        note: row.get(3)?,
        files: Vec::new(),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn fetch_files(conn: &Connection, update_id: &str) -> Result<Vec<UpdateFile>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, original_name, stored_name, path, mime_type, position
         FROM update_files WHERE update_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![update_id], |row| {
        Ok(UpdateFile {
            id: row.get(0)?,
            original_name: row.get(1)?,
            stored_name: row.get(2)?,
            path: row.get(3)?,
            mime_type: row.get(4)?,
            position: row.get(5)?,
        })
    })?;

    let mut files = Vec::new();
    for row in rows {
        files.push(row?);
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
