//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, resolves the user via the
//! token store, and injects `ActorContext` into request extensions for
//! downstream handlers.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{hash_token, ActorContext, ApiContext};
use crate::directory;

/// Require a valid bearer token for an active account.
///
/// Accesses `ApiContext` from request extensions (injected by Extension
/// layer). On success: injects `ActorContext` and a `Cache-Control: no-store`
/// response header.
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let user = {
        let conn = ctx.open_db()?;
        directory::user_for_token(&conn, &hash_token(&token))?.ok_or(ApiError::Unauthorized)?
    };

    req.extensions_mut().insert(ActorContext { user });

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));

    Ok(response)
}
