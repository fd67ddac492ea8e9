//! Shared types for the API layer.

use std::sync::Arc;

use crate::api::error::ApiError;
use crate::core_state::AppState;
use crate::directory::User;

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<AppState>,
}

impl ApiContext {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Open a connection to the service database for one request.
    pub fn open_db(&self) -> Result<rusqlite::Connection, ApiError> {
        self.state.open_db().map_err(ApiError::from)
    }
}

/// Authenticated user context, injected into request extensions by the auth
/// middleware after token validation.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user: User,
}

/// Hash a bearer token for storage and lookup (SHA-256, hex).
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
