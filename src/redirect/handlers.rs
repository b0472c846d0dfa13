use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;

use crate::api::handlers::AppState;
use crate::error::LinkError;

pub const CACHE_HIT_HEADER: &str = "x-relink-cache-hit";

/// Redirect to the original URL
pub async fn redirect_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Response, LinkError> {
    let resolution = state.resolver.resolve(&code).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_HIT_HEADER,
        HeaderValue::from_static(if resolution.cache_hit { "true" } else { "false" }),
    );

    Ok((headers, Redirect::temporary(&resolution.original_url)).into_response())
}
