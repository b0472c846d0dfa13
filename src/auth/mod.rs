pub mod accounts;
pub mod jwt;
pub mod password;

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::config::{AuthConfig, AuthMode};
pub use accounts::AccountService;
use jwt::JwtService;

/// Who is making a request. `user_id: None` is an anonymous caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
}

pub struct AuthService {
    jwt: Option<Arc<JwtService>>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let jwt = match config.mode {
            AuthMode::None => None,
            AuthMode::Jwt => {
                let jwt = config
                    .jwt
                    .as_ref()
                    .context("JWT auth mode requires a JWT configuration")?;
                Some(Arc::new(JwtService::from_config(jwt)))
            }
        };

        Ok(Self { jwt })
    }

    pub fn is_enabled(&self) -> bool {
        self.jwt.is_some()
    }

    /// Token service shared with account login, when auth is enabled
    pub fn jwt(&self) -> Option<Arc<JwtService>> {
        self.jwt.clone()
    }

    /// Resolve the caller. A missing token is anonymous; a bad token is an error.
    pub fn identify(&self, headers: &HeaderMap) -> Result<Identity> {
        let Some(validator) = &self.jwt else {
            return Ok(Identity::default());
        };

        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(Identity::default());
        };

        let token = value
            .to_str()
            .ok()
            .and_then(|raw| raw.strip_prefix("Bearer "))
            .map(str::trim)
            .context("malformed Authorization header")?;

        let claims = validator.validate(token)?;
        Ok(Identity {
            user_id: Some(claims.sub),
        })
    }
}

pub async fn auth_middleware(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    match auth_service.identify(&headers) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, "rejected bearer token");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid or expired token" })),
            )
                .into_response()
        }
    }
}
