//! Service router.
//!
//! Returns a composable `Router`. Application routes live under `/api/`;
//! attachment serving lives under `/uploads/`. Everything except health,
//! register, and login requires bearer token authentication.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::AppState;

/// Build the service router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(state: Arc<AppState>) -> Router {
    build_router(ApiContext::new(state))
}

fn build_router(ctx: ApiContext) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        .route("/auth/logout", post(endpoints::auth::logout))
        .route("/doctors/search", get(endpoints::doctors::search))
        .route(
            "/connections",
            post(endpoints::connections::create).get(endpoints::connections::list),
        )
        .route("/connections/history", get(endpoints::connections::history))
        .route(
            "/connections/check/:doctor_id",
            get(endpoints::connections::check),
        )
        .route("/connections/:id", get(endpoints::connections::detail))
        .route("/connections/:id/accept", post(endpoints::connections::accept))
        .route("/connections/:id/decline", post(endpoints::connections::decline))
        .route("/connections/:id/archive", post(endpoints::connections::archive))
        .route("/connections/:id/tasks", get(endpoints::tasks::list))
        .route(
            "/connections/:id/tasks/video",
            post(endpoints::tasks::assign_video),
        )
        .route(
            "/connections/:id/tasks/manual",
            post(endpoints::tasks::create_manual),
        )
        .route("/connections/:id/tasks/reset", post(endpoints::tasks::reset_all))
        .route(
            "/tasks/video/:id/complete",
            post(endpoints::tasks::complete_video),
        )
        .route(
            "/tasks/manual/:id/complete",
            post(endpoints::tasks::complete_manual),
        )
        .route("/tasks/video/delete", post(endpoints::tasks::delete_video))
        .route("/tasks/manual/delete", post(endpoints::tasks::delete_manual))
        .route(
            "/connections/:id/updates",
            post(endpoints::updates::submit)
                .get(endpoints::updates::list)
                .delete(endpoints::updates::clear),
        )
        .route(
            "/connections/:id/task-notice",
            post(endpoints::updates::task_notice),
        )
        .route("/connections/:id/progress", get(endpoints::progress::report))
        .route("/notifications", get(endpoints::notifications::list))
        .route(
            "/notifications/:id/read",
            post(endpoints::notifications::mark_read),
        )
        .route(
            "/videos",
            get(endpoints::videos::list).post(endpoints::videos::add),
        )
        .with_state(ctx.clone())
        // Attachments may run up to the storage cap plus multipart framing.
        .layer(DefaultBodyLimit::max(6 * 1024 * 1024))
        // route_layer keeps unmatched paths out of the auth stack, so an
        // unknown URI is a plain 404 rather than a 401.
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth))
        // Extension must be outermost so the middleware can extract ApiContext
        .route_layer(axum::Extension(ctx.clone()));

    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/auth/register", post(endpoints::auth::register))
        .route("/auth/login", post(endpoints::auth::login))
        .with_state(ctx.clone());

    let uploads = Router::new()
        .route("/uploads/:name", get(endpoints::updates::attachment))
        .with_state(ctx.clone())
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .route_layer(axum::Extension(ctx));

    Router::new()
        .nest("/api", protected)
        .nest("/api", unprotected)
        .merge(uploads)
        .layer(CorsLayer::permissive())
}
