//! Exercise video catalog doctors assign tasks from.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DatabaseError;

#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub youtube_id: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewVideo {
    pub title: String,
    pub youtube_id: String,
    pub domain: Option<String>,
}

pub fn add_video(conn: &Connection, new: &NewVideo) -> Result<Video, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO videos (id, title, youtube_id, domain, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, new.title, new.youtube_id, new.domain, now],
    )?;
    Ok(Video {
        id,
        title: new.title.clone(),
        youtube_id: new.youtube_id.clone(),
        domain: new.domain.clone(),
        created_at: now,
    })
}

/// Catalog videos, optionally filtered by specialty domain, newest first.
pub fn list_videos(conn: &Connection, domain: Option<&str>) -> Result<Vec<Video>, DatabaseError> {
    let mut sql = String::from(
        "SELECT id, title, youtube_id, domain, created_at FROM videos",
    );
    if domain.is_some() {
        sql.push_str(" WHERE domain = ?1");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let map = |row: &rusqlite::Row<'_>| {
        Ok(Video {
            id: row.get(0)?,
            title: row.get(1)?,
            youtube_id: row.get(2)?,
            domain: row.get(3)?,
            created_at: row.get(4)?,
        })
    };
    let rows = match domain {
        Some(d) => stmt.query_map(params![d], map)?,
        None => stmt.query_map([], map)?,
    };

    let mut videos = Vec::new();
    for row in rows {
        videos.push(row?);
    }
    Ok(videos)
}
