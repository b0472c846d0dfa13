use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::auth::{AccountService, Identity};
use crate::error::{AuthError, LinkError};
use crate::links::{LinkManager, LinkResolver};
use crate::models::{
    CreateLink, CreateLinkRequest, Credentials, Link, LinkStats, TokenResponse, UpdateLinkRequest,
};

pub struct AppState {
    pub manager: Arc<LinkManager>,
    pub resolver: Arc<LinkResolver>,
    /// Present only when bearer auth is enabled
    pub accounts: Option<Arc<AccountService>>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub original_link: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl LinkError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LinkError::NotFound | LinkError::Expired => StatusCode::NOT_FOUND,
            LinkError::AliasTaken(_) => StatusCode::CONFLICT,
            LinkError::InvalidUrl(_) | LinkError::InvalidAlias(_) | LinkError::InvalidExpiry(_) => {
                StatusCode::BAD_REQUEST
            }
            LinkError::Forbidden => StatusCode::FORBIDDEN,
            LinkError::GenerationExhausted { .. }
            | LinkError::StoreUnavailable(_)
            | LinkError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Disabled | AuthError::UserNotFound(_) => StatusCode::NOT_FOUND,
            AuthError::UserExists(_) | AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "auth request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn accounts(state: &AppState) -> Result<&AccountService, AuthError> {
    state.accounts.as_deref().ok_or(AuthError::Disabled)
}

/// Create an account and return a token for it
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<TokenResponse>, AuthError> {
    let token = accounts(&state)?.register(credentials).await?;
    Ok(Json(token))
}

/// Exchange a username and password for a token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<TokenResponse>, AuthError> {
    let token = accounts(&state)?.login(credentials).await?;
    Ok(Json(token))
}

/// Create a short link
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<Link>), LinkError> {
    let link = state
        .manager
        .create(CreateLink {
            original_url: payload.original_url,
            custom_alias: payload.custom_alias,
            expires_at: payload.expires_at,
            owner_id: identity.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(link)))
}

/// Links pointing at a given original URL
pub async fn search_links(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Link>>, LinkError> {
    let links = state
        .manager
        .search(&query.original_link, query.limit, query.offset)
        .await?;
    Ok(Json(links))
}

pub async fn list_expired(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Link>>, LinkError> {
    Ok(Json(state.manager.list_expired().await?))
}

pub async fn update_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<UpdateLinkRequest>,
) -> Result<Json<Link>, LinkError> {
    let link = state
        .manager
        .update(&code, payload.into(), identity.user_id.as_deref())
        .await?;
    Ok(Json(link))
}

/// Delete a link. Succeeds whether or not it existed.
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Extension(identity): Extension<Identity>,
) -> Result<StatusCode, LinkError> {
    state
        .manager
        .delete_as(&code, identity.user_id.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn link_stats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<LinkStats>, LinkError> {
    Ok(Json(state.manager.stats(&code).await?))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
