//! Progress report endpoint.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::Utc;

use crate::api::error::ApiError;
use crate::api::types::{ActorContext, ApiContext};
use crate::progress::{self, ProgressReport};

/// `GET /api/connections/:id/progress` — recovery score, pain trend, and
/// task stats for a connection.
pub async fn report(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(connection_id): Path<String>,
) -> Result<Json<ProgressReport>, ApiError> {
    let conn = ctx.open_db()?;
    let report = progress::connection_progress(&conn, &connection_id, &actor.user, Utc::now())?;
    Ok(Json(report))
}
