//! Connection lifecycle endpoints.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ActorContext, ApiContext};
use crate::models::{ConnectionStatus, Role};
use crate::registry::{self, ConnectionRequest, EnrichedConnection, PairStatus};

#[derive(Deserialize)]
pub struct CreateConnectionRequest {
    pub doctor_id: String,
    pub problem: String,
    #[serde(default)]
    pub message: String,
}

/// `POST /api/connections` — patient requests a connection to a doctor.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<Json<EnrichedConnection>, ApiError> {
    if actor.user.role != Role::Patient {
        return Err(ApiError::Forbidden);
    }

    let conn = ctx.open_db()?;
    let connection = registry::request_connection(
        &conn,
        &ConnectionRequest {
            patient_id: actor.user.id.clone(),
            doctor_id: req.doctor_id,
            problem: req.problem,
            message: req.message,
        },
    )?;
    Ok(Json(registry::enrich(&conn, connection)?))
}

#[derive(Deserialize)]
pub struct ConnectionListQuery {
    pub status: Option<ConnectionStatus>,
}

#[derive(Serialize)]
pub struct ConnectionListResponse {
    pub connections: Vec<EnrichedConnection>,
}

/// `GET /api/connections` — connections where the actor is a party, on the
/// side matching their role.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Query(query): Query<ConnectionListQuery>,
) -> Result<Json<ConnectionListResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let rows = registry::list_by_role(&conn, &actor.user, actor.user.role, query.status)?;

    let mut connections = Vec::with_capacity(rows.len());
    for row in rows {
        connections.push(registry::enrich(&conn, row)?);
    }
    Ok(Json(ConnectionListResponse { connections }))
}

/// `GET /api/connections/history` — the patient's closed connections.
pub async fn history(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<ConnectionListResponse>, ApiError> {
    if actor.user.role != Role::Patient {
        return Err(ApiError::Forbidden);
    }

    let conn = ctx.open_db()?;
    let rows = registry::list_history(&conn, &actor.user)?;
    let mut connections = Vec::with_capacity(rows.len());
    for row in rows {
        connections.push(registry::enrich(&conn, row)?);
    }
    Ok(Json(ConnectionListResponse { connections }))
}

/// `GET /api/connections/check/:doctor_id` — most recent pair status before
/// sending a new request.
pub async fn check(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(doctor_id): Path<String>,
) -> Result<Json<PairStatus>, ApiError> {
    let conn = ctx.open_db()?;
    let status = registry::check_pair_status(&conn, &actor.user, &doctor_id)?;
    Ok(Json(status))
}

/// `GET /api/connections/:id` — a single connection, visible to either party.
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> Result<Json<EnrichedConnection>, ApiError> {
    let conn = ctx.open_db()?;
    let connection = registry::get_connection(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Connection not found".into()))?;
    if !registry::is_authorized_party(&connection, &actor.user) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(registry::enrich(&conn, connection)?))
}

/// `POST /api/connections/:id/accept` — the doctor accepts a request.
pub async fn accept(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> Result<Json<EnrichedConnection>, ApiError> {
    let conn = ctx.open_db()?;
    let connection = registry::get_connection(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Connection not found".into()))?;
    if !registry::doctor_matches(&connection.doctor_id, &actor.user) {
        return Err(ApiError::Forbidden);
    }

    let accepted = registry::accept_connection(&conn, &id)?;
    Ok(Json(registry::enrich(&conn, accepted)?))
}

#[derive(Deserialize, Default)]
pub struct DeclineRequest {
    pub reason: Option<String>,
}

/// `POST /api/connections/:id/decline` — the doctor declines with an
/// optional reason.
pub async fn decline(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Option<Json<DeclineRequest>>,
) -> Result<Json<EnrichedConnection>, ApiError> {
    let conn = ctx.open_db()?;
    let connection = registry::get_connection(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Connection not found".into()))?;
    if !registry::doctor_matches(&connection.doctor_id, &actor.user) {
        return Err(ApiError::Forbidden);
    }

    let reason = body.and_then(|Json(b)| b.reason);
    let declined = registry::decline_connection(&conn, &id, reason.as_deref())?;
    Ok(Json(registry::enrich(&conn, declined)?))
}

/// `POST /api/connections/:id/archive` — the owning doctor archives a
/// finished connection. Tasks and updates are retained.
pub async fn archive(
    State(ctx): State<ApiContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> Result<Json<EnrichedConnection>, ApiError> {
    let conn = ctx.open_db()?;
    let archived = registry::archive_connection(&conn, &id, &actor.user)?;
    Ok(Json(registry::enrich(&conn, archived)?))
}
