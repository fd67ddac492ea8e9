//! Doctor directory endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::directory::{self, UserSummary};

#[derive(Deserialize)]
pub struct DoctorSearchQuery {
    pub domain: Option<String>,
}

#[derive(Serialize)]
pub struct DoctorSearchResponse {
    pub doctors: Vec<UserSummary>,
}

/// `GET /api/doctors/search` — active doctors, optionally by specialty.
pub async fn search(
    State(ctx): State<ApiContext>,
    Query(query): Query<DoctorSearchQuery>,
) -> Result<Json<DoctorSearchResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let doctors = directory::search_doctors(&conn, query.domain.as_deref())?
        .into_iter()
        .map(UserSummary::from)
        .collect();
    Ok(Json(DoctorSearchResponse { doctors }))
}
