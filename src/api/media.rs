//! Media serving and anonymous temporary uploads
//!
//! - GET  /media/{*key}?expires&signature   signed object download
//! - POST /api/v1/temp/image                 multipart `media_temp`

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::api::common::FormData;
use crate::api::middleware::{extract_ip_address, ApiError, AppState};
use crate::storage::content_type_for;

/// Temporary uploads are anonymous, so they get a fixed cap
const TEMP_UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// Routes mounted at the site root, next to `/api/v1`
pub fn media_router() -> Router<AppState> {
    Router::new().route("/media/{*key}", get(serve_media))
}

pub fn temp_router() -> Router<AppState> {
    Router::new().route(
        "/temp/image",
        post(upload_temp).layer(DefaultBodyLimit::max(TEMP_UPLOAD_LIMIT)),
    )
}

/// GET /media/{*key}
async fn serve_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, ApiError> {
    let (expires, signature) = match (query.expires, query.signature.as_deref()) {
        (Some(expires), Some(signature)) => (expires, signature),
        _ => return Err(ApiError::forbidden("Missing link signature")),
    };

    state
        .media_store
        .verify(&key, expires, signature, Utc::now())?;
    let bytes = state.media_store.read(&key).await?;

    let max_age = (expires - Utc::now().timestamp()).max(0);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&key).to_string()),
            (header::CACHE_CONTROL, format!("private, max-age={}", max_age)),
        ],
        Body::from(bytes),
    )
        .into_response())
}

/// POST /api/v1/temp/image
async fn upload_temp(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let file = form
        .take_files("media_temp")
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::bad_request("media_temp file is required"))?;

    let ip_address = extract_ip_address(&headers).unwrap_or_else(|| "unknown".to_string());
    let upload = state.albums.upload_temp(file, &ip_address).await?;
    Ok((StatusCode::CREATED, Json(upload)))
}
