use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AuthService};
use crate::redirect::redirect_link;

use super::handlers::{
    create_link, delete_link, health_check, link_stats, list_expired, login, register,
    search_links, update_link, AppState,
};

/// Static segments (`shorten`, `search`, `expired`) win over `{code}`; the code
/// generator never hands them out.
pub fn create_router(state: Arc<AppState>, auth_service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/login", post(login))
        .route("/v1/links/shorten", post(create_link))
        .route("/v1/links/search", get(search_links))
        .route("/v1/links/expired", get(list_expired))
        .route(
            "/v1/links/{code}",
            get(redirect_link).put(update_link).delete(delete_link),
        )
        .route("/v1/links/{code}/stats", get(link_stats))
        .layer(middleware::from_fn_with_state(auth_service, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
