//! Patient update endpoints: multipart submission, listing, task notices,
//! attachment serving.

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ActorContext, ApiContext};
use crate::reconciler::{self, NewFile, NewUpdate, PatientUpdate};
use crate::registry;
use crate::storage;

/// `POST /api/connections/:id/updates` — multipart submission by the
/// connection's patient. Fields: `pain_level` (0..=10), `note`, and any
/// number of `files` parts.
pub async fn submit(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<PatientUpdate>, ApiError> {
    // Check ownership before attachments touch disk.
    {
        let conn = ctx.open_db()?;
        let connection = registry::get_connection(&conn, &connection_id)?
            .ok_or_else(|| ApiError::NotFound("Connection not found".into()))?;
        if !registry::patient_matches(&connection.patient_id, &actor.user) {
            return Err(ApiError::Forbidden);
        }
    }

    let mut new = NewUpdate::default();
    let mut files: Vec<NewFile> = Vec::new();
    let uploads_dir = ctx.state.uploads_dir();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "pain_level" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                let value: i32 = text
                    .trim()
                    .parse()
                    .map_err(|_| ApiError::BadRequest("pain_level must be a number".into()))?;
                new.pain_level = Some(value);
            }
            "note" => {
                new.note = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            "files" => {
                let original_name = field.file_name().unwrap_or("attachment").to_string();
                let mime_type = field
                    .content_type()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&original_name)
                            .first_or_octet_stream()
                            .to_string()
                    });
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

                files.push(storage::store_attachment(
                    &uploads_dir,
                    &original_name,
                    &mime_type,
                    &bytes,
                )?);
            }
            _ => {}
        }
    }

    let conn = ctx.open_db()?;
    let update = reconciler::submit_update(&conn, &connection_id, &actor.user, &new, &files)?;
    Ok(Json(update))
}

#[derive(Serialize)]
pub struct UpdateListResponse {
    pub updates: Vec<PatientUpdate>,
}

/// `GET /api/connections/:id/updates` — all updates, newest first, after
/// duplicate repair.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<UpdateListResponse>, ApiError> {
    let conn = ctx.open_db()?;
    authorize_party(&conn, &connection_id, &actor)?;

    let updates = reconciler::list_updates(&conn, &connection_id)?;
    Ok(Json(UpdateListResponse { updates }))
}

#[derive(Deserialize)]
pub struct TaskNoticeRequest {
    pub note: String,
}

/// `POST /api/connections/:id/task-notice` — append-only completion notice.
pub async fn task_notice(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
    Json(req): Json<TaskNoticeRequest>,
) -> Result<Json<PatientUpdate>, ApiError> {
    if req.note.trim().is_empty() {
        return Err(ApiError::BadRequest("note is required".into()));
    }

    let conn = ctx.open_db()?;
    let update = reconciler::record_task_notice(&conn, &connection_id, &actor.user, &req.note)?;
    Ok(Json(update))
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

/// `DELETE /api/connections/:id/updates` — the owning doctor clears the
/// update history, e.g. when restarting a treatment cycle. Stored blobs are
/// removed along with the rows.
pub async fn clear(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<ClearResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let connection = registry::get_connection(&conn, &connection_id)?
        .ok_or_else(|| ApiError::NotFound("Connection not found".into()))?;
    if !registry::doctor_matches(&connection.doctor_id, &actor.user) {
        return Err(ApiError::Forbidden);
    }

    let uploads_dir = ctx.state.uploads_dir();
    for update in reconciler::list_updates(&conn, &connection_id)? {
        for file in &update.files {
            storage::remove_attachment(&uploads_dir, &file.stored_name)?;
        }
    }

    let removed = reconciler::clear_updates(&conn, &connection_id)?;
    Ok(Json(ClearResponse { removed }))
}

/// `GET /uploads/:name` — serve a stored attachment.
pub async fn attachment(
    State(ctx): State<ApiContext>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = storage::resolve_attachment(&ctx.state.uploads_dir(), &name)?;
    let content_type = storage::content_type_for(&path);
    let bytes = std::fs::read(&path).map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn authorize_party(
    conn: &rusqlite::Connection,
    connection_id: &str,
    actor: &ActorContext,
) -> Result<(), ApiError> {
    let connection = registry::get_connection(conn, connection_id)?
        .ok_or_else(|| ApiError::NotFound("Connection not found".into()))?;
    if !registry::is_authorized_party(&connection, &actor.user) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}
