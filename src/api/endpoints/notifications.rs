//! Notification endpoints.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::{ActorContext, ApiContext};
use crate::notifications::{self, StoredNotification};

#[derive(Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<StoredNotification>,
}

/// `GET /api/notifications` — the actor's notifications, newest first.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<NotificationListResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let notifications = notifications::list_for_user(&conn, &actor.user.id)?;
    Ok(Json(NotificationListResponse { notifications }))
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub read: bool,
}

/// `POST /api/notifications/:id/read` — mark one of the actor's
/// notifications as read.
pub async fn mark_read(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let conn = ctx.open_db()?;
    if !notifications::mark_read(&conn, &id, &actor.user.id)? {
        return Err(ApiError::NotFound("Notification not found".into()));
    }
    Ok(Json(MarkReadResponse { read: true }))
}
