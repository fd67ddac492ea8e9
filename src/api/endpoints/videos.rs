//! Video catalog endpoints.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ActorContext, ApiContext};
use crate::models::Role;
use crate::videos::{self, NewVideo, Video};

#[derive(Deserialize)]
pub struct VideoListQuery {
    pub domain: Option<String>,
}

#[derive(Serialize)]
pub struct VideoListResponse {
    pub videos: Vec<Video>,
}

/// `GET /api/videos` — catalog videos, optionally filtered by specialty.
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<VideoListQuery>,
) -> Result<Json<VideoListResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let videos = videos::list_videos(&conn, query.domain.as_deref())?;
    Ok(Json(VideoListResponse { videos }))
}

/// `POST /api/videos` — doctors add catalog entries.
pub async fn add(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Json(new): Json<NewVideo>,
) -> Result<Json<Video>, ApiError> {
    if actor.user.role != Role::Doctor {
        return Err(ApiError::Forbidden);
    }
    if new.title.trim().is_empty() || new.youtube_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "title and youtube_id are required".into(),
        ));
    }

    let conn = ctx.open_db()?;
    let video = videos::add_video(&conn, &new)?;
    Ok(Json(video))
}
