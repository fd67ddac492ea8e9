//! Account endpoints: register, login, logout.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{generate_token, hash_token, ApiContext};
use crate::directory::{self, NewUser, User};

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// `POST /api/auth/register` — create an account and issue a token.
pub async fn register(
    State(ctx): State<ApiContext>,
    Json(new): Json<NewUser>,
) -> Result<Json<AuthResponse>, ApiError> {
    if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
        return Err(ApiError::BadRequest("Name is required".into()));
    }
    if new.email.trim().is_empty() || !new.email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".into()));
    }
    if new.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }

    let conn = ctx.open_db()?;
    let user = match directory::create_user(&conn, &new) {
        Ok(user) => user,
        Err(e) if e.is_unique_violation() => {
            return Err(ApiError::BadRequest("Email is already registered".into()))
        }
        Err(e) => return Err(e.into()),
    };

    let token = generate_token();
    directory::store_token(&conn, &hash_token(&token), &user.id)?;

    Ok(Json(AuthResponse { token, user }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `POST /api/auth/login` — verify credentials and issue a token.
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let user = directory::authenticate(&conn, &req.email, &req.password)?
        .ok_or(ApiError::Unauthorized)?;

    let token = generate_token();
    directory::store_token(&conn, &hash_token(&token), &user.id)?;

    Ok(Json(AuthResponse { token, user }))
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// `POST /api/auth/logout` — revoke the presented token.
pub async fn logout(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, ApiError> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let conn = ctx.open_db()?;
    directory::revoke_token(&conn, &hash_token(token))?;

    Ok(Json(LogoutResponse { logged_out: true }))
}
