//! API layer - HTTP handlers and routing
//!
//! - Auth endpoints (signup, login, tokens, two-factor)
//! - User endpoints (profile, follow, subscription)
//! - Album endpoints behind the upload gates
//! - Signed media serving and temporary uploads

pub mod albums;
pub mod auth;
pub mod common;
pub mod media;
pub mod middleware;
pub mod quota;
pub mod users;
pub mod validation;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/users", users::router())
        .merge(albums::router(state.clone()))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::public_router())
        .merge(media::temp_router())
        .merge(protected_routes)
}

/// GET /api/v1/health
async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.pool.ping().await.map_err(|e| {
        tracing::error!("Health check failed: {:#}", e);
        ApiError::internal_error("Database unavailable")
    })?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if cors_origin == "*" {
        return cors.allow_origin(Any);
    }
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!("Ignoring invalid CORS origin '{}'", cors_origin);
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .merge(media::media_router())
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
