//! Upload gates
//!
//! `body_limit` runs on every `/albums` route: it refuses a declared
//! Content-Length above the tier limit and caps the streamed body at the
//! same size. `capacity` runs on the routes that store new media and refuses
//! once the owner's usage reaches the tier capacity. Both expect
//! [`require_auth`](super::middleware::require_auth) to have run first.

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tower::{Layer, ServiceExt};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};

fn current_user_id(request: &Request) -> Result<i64, ApiError> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.id)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))
}

fn declared_length(request: &Request) -> u64 {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

pub async fn body_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = current_user_id(&request)?;
    let limit = state
        .quota
        .ensure_body_limit(user_id, declared_length(&request))
        .await?;

    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    match DefaultBodyLimit::max(limit).layer(next).oneshot(request).await {
        Ok(response) => Ok(response),
        Err(never) => match never {},
    }
}

pub async fn capacity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = current_user_id(&request)?;
    state.quota.ensure_capacity(user_id).await?;
    Ok(next.run(request).await)
}
