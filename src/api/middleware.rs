//! API middleware
//!
//! Shared state, the error envelope every handler returns, and bearer-token
//! authentication.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::db::repositories::{
    SqlxAlbumRepository, SqlxCommentRepository, SqlxMediaRepository, SqlxSubscriptionRepository,
    SqlxTokenRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    AccessError, AlbumError, AlbumService, AuthError, AuthService, LoginRateLimiter,
    NotificationQueue, QuotaError, QuotaService, TokenError, UserError, UserService,
};
use crate::storage::{LocalObjectStorage, ObjectStorage, StorageError};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub users: Arc<UserService>,
    pub albums: Arc<AlbumService>,
    pub quota: Arc<QuotaService>,
    /// Serves signed media links
    pub media_store: Arc<LocalObjectStorage>,
    pub rate_limiter: Arc<LoginRateLimiter>,
}

impl AppState {
    /// Wire repositories and services over one pool
    pub fn new(pool: DynDatabasePool, config: Arc<Config>, notifier: NotificationQueue) -> Self {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let subscription_repo = SqlxSubscriptionRepository::boxed(pool.clone());
        let media_repo = SqlxMediaRepository::boxed(pool.clone());

        let media_store = Arc::new(LocalObjectStorage::from_config(&config.storage));
        let storage: Arc<dyn ObjectStorage> = media_store.clone();

        let quota = Arc::new(QuotaService::new(
            user_repo.clone(),
            subscription_repo.clone(),
            media_repo.clone(),
            config.quota.body_limit_scaling,
        ));
        let auth = Arc::new(AuthService::new(
            user_repo.clone(),
            subscription_repo.clone(),
            SqlxTokenRepository::boxed(pool.clone()),
            notifier.clone(),
            &config,
        ));
        let users = Arc::new(UserService::new(
            user_repo.clone(),
            subscription_repo,
            quota.clone(),
            storage.clone(),
            notifier.clone(),
            std::time::Duration::from_secs(config.storage.presign_ttl_secs),
        ));
        let albums = Arc::new(AlbumService::new(
            SqlxAlbumRepository::boxed(pool.clone()),
            media_repo,
            SqlxCommentRepository::boxed(pool.clone()),
            user_repo,
            storage,
            notifier,
            &config,
        ));

        Self {
            pool,
            config,
            auth,
            users,
            albums,
            quota,
            media_store,
            rate_limiter: Arc::new(LoginRateLimiter::new()),
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// Log the cause and hide it from the client
    fn internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!("{:#}", cause);
        Self::internal_error("Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" | "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "FILE_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            "QUOTA_EXCEEDED" => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::Denied => ApiError::forbidden(e.to_string()),
            AccessError::DataIntegrity { .. } => ApiError::internal(e),
        }
    }
}

impl From<QuotaError> for ApiError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::QuotaExceeded { .. } => ApiError::new("QUOTA_EXCEEDED", e.to_string()),
            QuotaError::FileTooLarge { .. } => ApiError::new("FILE_TOO_LARGE", e.to_string()),
            QuotaError::UserNotFound(_) => ApiError::not_found(e.to_string()),
            QuotaError::TierResolution(_) | QuotaError::Internal(_) => ApiError::internal(e),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidKey(_) => ApiError::bad_request(e.to_string()),
            StorageError::NotFound => ApiError::not_found(e.to_string()),
            StorageError::InvalidSignature | StorageError::Expired => {
                ApiError::forbidden(e.to_string())
            }
            StorageError::ForeignUrl(_) | StorageError::Io(_) => ApiError::internal(e),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(msg) => ApiError::validation_error(msg),
            AuthError::EmailTaken | AuthError::TwoFactorAlreadyEnabled => {
                ApiError::conflict(e.to_string())
            }
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::InvalidCode => {
                ApiError::unauthorized(e.to_string())
            }
            AuthError::Token(TokenError::Signing(_)) => ApiError::internal(e),
            AuthError::Token(_) => ApiError::unauthorized(e.to_string()),
            AuthError::AccountDeleted => ApiError::forbidden(e.to_string()),
            AuthError::UserNotFound => ApiError::not_found(e.to_string()),
            AuthError::TwoFactorNotConfigured => ApiError::bad_request(e.to_string()),
            AuthError::Totp(_) | AuthError::Internal(_) => ApiError::internal(e),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::NotFound | UserError::TierNotFound(_) => ApiError::not_found(e.to_string()),
            UserError::Forbidden(msg) => ApiError::forbidden(msg),
            UserError::Conflict(msg) => ApiError::conflict(msg),
            UserError::Validation(msg) => ApiError::validation_error(msg),
            UserError::Storage(inner) => inner.into(),
            UserError::Quota(inner) => inner.into(),
            UserError::Internal(_) => ApiError::internal(e),
        }
    }
}

impl From<AlbumError> for ApiError {
    fn from(e: AlbumError) -> Self {
        match e {
            AlbumError::NotFound | AlbumError::MediaNotFound => ApiError::not_found(e.to_string()),
            AlbumError::Access(inner) => inner.into(),
            AlbumError::NotOwner => ApiError::conflict(e.to_string()),
            AlbumError::Forbidden(msg) => ApiError::forbidden(msg),
            AlbumError::Validation(msg) => ApiError::bad_request(msg),
            AlbumError::Storage(inner) => inner.into(),
            AlbumError::Internal(_) => ApiError::internal(e),
        }
    }
}

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Client IP from proxy headers, first hop wins
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(ip) = forwarded.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?
        .to_string();

    let user = state.auth.authenticate(&token).await?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}
