//! Notification sink — one-way read/unread events for users.
//!
//! Written by Connection Registry transitions (accept/decline); never
//! consumed by core logic. The only mutation after insert is the read flag.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::NotificationType;

#[derive(Debug, Clone, Serialize)]
pub struct StoredNotification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    pub reason: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Record a notification for a user.
pub fn insert_notification(
    conn: &Connection,
    user_id: &str,
    kind: NotificationType,
    message: &str,
    reason: Option<&str>,
) -> Result<String, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications (id, user_id, type, message, reason, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![id, user_id, kind.as_str(), message, reason, Utc::now()],
    )?;
    Ok(id)
}

/// Notifications for a user, newest first.
pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<StoredNotification>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, type, message, reason, read, created_at
         FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(params![user_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, i32>(5)?,
            row.get::<_, DateTime<Utc>>(6)?,
        ))
    })?;

    let mut notifications = Vec::new();
    for row in rows {
        let (id, user_id, kind, message, reason, read, created_at) = row?;
        notifications.push(StoredNotification {
            id,
            user_id,
            kind: NotificationType::from_str(&kind)?,
            message,
            reason,
            read: read != 0,
            created_at,
        });
    }
    Ok(notifications)
}

/// Flip the read flag. Returns false when the id does not exist or belongs to
/// another user.
pub fn mark_read(
    conn: &Connection,
    notification_id: &str,
    user_id: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
        params![notification_id, user_id],
    )?;
    Ok(changed > 0)
}
