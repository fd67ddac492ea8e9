//! Task endpoints: assignment, reconciled listing, completion, bulk ops.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ActorContext, ApiContext};
use crate::registry;
use crate::scheduler::{
    self, AssignedTask, ManualTask, NewAssignedTask, NewManualTask,
};

/// `POST /api/connections/:id/tasks/video` — doctor assigns a video task.
pub async fn assign_video(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
    Json(new): Json<NewAssignedTask>,
) -> Result<Json<AssignedTask>, ApiError> {
    let conn = ctx.open_db()?;
    let task = scheduler::assign_video_task(&conn, &connection_id, &actor.user, &new)?;
    Ok(Json(task))
}

/// `POST /api/connections/:id/tasks/manual` — doctor creates a manual task.
pub async fn create_manual(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
    Json(new): Json<NewManualTask>,
) -> Result<Json<ManualTask>, ApiError> {
    let conn = ctx.open_db()?;
    let task = scheduler::create_manual_task(&conn, &connection_id, &actor.user, &new)?;
    Ok(Json(task))
}

#[derive(Serialize)]
pub struct TaskListResponse {
    pub video_tasks: Vec<AssignedTask>,
    pub manual_tasks: Vec<ManualTask>,
}

/// `GET /api/connections/:id/tasks` — both task lists after lazy reset.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let connection = registry::get_connection(&conn, &connection_id)?
        .ok_or_else(|| ApiError::NotFound("Connection not found".into()))?;
    if !registry::is_authorized_party(&connection, &actor.user) {
        return Err(ApiError::Forbidden);
    }

    let now = Utc::now();
    Ok(Json(TaskListResponse {
        video_tasks: scheduler::list_video_tasks(&conn, &connection_id, now)?,
        manual_tasks: scheduler::list_manual_tasks(&conn, &connection_id, now)?,
    }))
}

/// `POST /api/tasks/video/:id/complete` — mark a video task done.
pub async fn complete_video(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(task_id): Path<String>,
) -> Result<Json<AssignedTask>, ApiError> {
    let conn = ctx.open_db()?;
    let task = scheduler::complete_video_task(&conn, &task_id, &actor.user, Utc::now())?;
    Ok(Json(task))
}

/// `POST /api/tasks/manual/:id/complete` — mark a manual task done.
pub async fn complete_manual(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(task_id): Path<String>,
) -> Result<Json<ManualTask>, ApiError> {
    let conn = ctx.open_db()?;
    let task = scheduler::complete_manual_task(&conn, &task_id, &actor.user, Utc::now())?;
    Ok(Json(task))
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub reset: usize,
}

/// `POST /api/connections/:id/tasks/reset` — doctor resets all video tasks
/// on a connection to pending.
pub async fn reset_all(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let reset = scheduler::reset_all_progress(&conn, &connection_id, &actor.user)?;
    Ok(Json(ResetResponse { reset }))
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<String>,
}

#[derive(Serialize)]
pub struct BulkDeleteResponse {
    pub deleted: usize,
}

/// `POST /api/tasks/video/delete` — bulk delete; unowned ids are skipped.
pub async fn delete_video(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let deleted = scheduler::delete_video_tasks(&conn, &req.ids, &actor.user)?;
    Ok(Json(BulkDeleteResponse { deleted }))
}

/// `POST /api/tasks/manual/delete` — bulk delete; unowned ids are skipped.
pub async fn delete_manual(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let deleted = scheduler::delete_manual_tasks(&conn, &req.ids, &actor.user)?;
    Ok(Json(BulkDeleteResponse { deleted }))
}
