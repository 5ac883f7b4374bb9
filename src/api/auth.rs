//! Authentication API endpoints
//!
//! Public:
//! - POST /api/v1/auth/signup
//! - POST /api/v1/auth/login
//! - GET  /api/v1/auth/refresh (refresh token in the Authorization header)
//! - POST /api/v1/auth/reset-password
//!
//! Protected:
//! - POST /api/v1/auth/logout
//! - PUT  /api/v1/auth/change-password
//! - POST /api/v1/auth/generate-totp
//! - POST /api/v1/auth/verify-totp
//! - POST /api/v1/auth/verify-tfa

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use validator::Validate;

use crate::api::middleware::{extract_ip_address, ApiError, AppState, AuthenticatedUser};
use crate::api::validation::{not_blank, ValidatedJson};
use crate::services::{AuthError, SignupInput};

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 50), custom(function = "not_blank"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50), custom(function = "not_blank"))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub password_confirm: String,
    #[serde(default)]
    pub agree_terms: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1))]
    pub recent_password: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CodeRequest {
    #[validate(length(equal = 6), custom(function = "not_blank"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user_id: i64,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub access_expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/refresh", get(refresh))
        .route("/reset-password", post(reset_password))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/change-password", put(change_password))
        .route("/generate-totp", post(generate_totp))
        .route("/verify-totp", post(verify_totp))
        .route("/verify-tfa", post(verify_tfa))
}

/// POST /api/v1/auth/signup
async fn signup(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .auth
        .signup(SignupInput {
            first_name: body.first_name,
            last_name: body.last_name,
            email: body.email,
            password: body.password,
            password_confirm: body.password_confirm,
            agree_terms: body.agree_terms,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user_id: user.id,
            email: user.email,
            message: "Account created".to_string(),
        }),
    ))
}

/// POST /api/v1/auth/login
///
/// Limited to 10 requests per minute per IP and 5 failed attempts per
/// 15 minutes per email.
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(body): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip_address = extract_ip_address(&headers);
    let email = body.email.trim().to_lowercase();

    if let Some(ip) = ip_address.as_deref().and_then(|s| s.parse::<IpAddr>().ok()) {
        if state.rate_limiter.is_ip_limited(ip).await {
            tracing::warn!("Login rate limit hit for IP {}", ip);
            return Err(ApiError::with_details(
                "RATE_LIMIT",
                "Too many requests, please try again later",
                serde_json::json!({"retry_after": 60}),
            ));
        }
        state.rate_limiter.record_ip_request(ip).await;
    }

    if state.rate_limiter.is_email_limited(&email).await {
        tracing::warn!("Login rate limit hit for {}", email);
        return Err(ApiError::with_details(
            "RATE_LIMIT",
            "Too many failed attempts, please try again in 15 minutes",
            serde_json::json!({"retry_after": 900}),
        ));
    }

    let outcome = match state
        .auth
        .login(&email, &body.password, ip_address.as_deref().unwrap_or(""))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(e, AuthError::InvalidCredentials) {
                state.rate_limiter.record_failed_attempt(&email).await;
            }
            return Err(e.into());
        }
    };

    state.rate_limiter.clear_email(&email).await;
    Ok(Json(outcome))
}

/// GET /api/v1/auth/refresh
async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, ApiError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Refresh token not found"))?;

    let issued = state.auth.refresh(raw).await?;
    Ok(Json(RefreshResponse {
        access_token: issued.token,
        access_expires_at: issued.expires_at.to_rfc3339(),
    }))
}

/// POST /api/v1/auth/reset-password
async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth.reset_password(&body.email).await?;
    Ok(MessageResponse::new("A temporary password has been sent to your email"))
}

/// POST /api/v1/auth/logout
async fn logout(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth.logout(user.id).await?;
    Ok(MessageResponse::new("Logged out"))
}

/// PUT /api/v1/auth/change-password
async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ValidatedJson(body): ValidatedJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .auth
        .change_password(&user, &body.recent_password, &body.new_password)
        .await?;
    Ok(MessageResponse::new("Password changed, please sign in again"))
}

/// POST /api/v1/auth/generate-totp
async fn generate_totp(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let enrollment = state.auth.generate_totp(&user).await?;
    Ok(Json(enrollment))
}

/// POST /api/v1/auth/verify-totp
async fn verify_totp(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ValidatedJson(body): ValidatedJson<CodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth.verify_totp(&user, body.code.trim()).await?;
    Ok(MessageResponse::new("Two-factor authentication enabled"))
}

/// POST /api/v1/auth/verify-tfa
async fn verify_tfa(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthenticatedUser(user): AuthenticatedUser,
    ValidatedJson(body): ValidatedJson<CodeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let ip_address = extract_ip_address(&headers).unwrap_or_default();
    state.auth.verify_tfa(&user, body.code.trim(), &ip_address).await?;
    Ok(MessageResponse::new("Verified"))
}
