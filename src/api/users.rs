//! User API endpoints
//!
//! All routes require authentication:
//! - GET    /api/v1/users/{id}
//! - PUT    /api/v1/users/{id}
//! - PUT    /api/v1/users/{id}/profile/picture
//! - GET    /api/v1/users/{id}/configuration
//! - POST   /api/v1/users/follow
//! - GET    /api/v1/users/subscription
//! - PUT    /api/v1/users/subscription
//! - DELETE /api/v1/users/deactivate
//! - DELETE /api/v1/users/delete

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::auth::MessageResponse;
use crate::api::common::FormData;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::validation::{alphanumeric, e164_phone, tag_lengths, ValidatedJson};
use crate::models::UpdateProfileInput;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 100))]
    pub full_name: Option<String>,
    #[validate(length(min = 3, max = 30), custom(function = "alphanumeric"))]
    pub user_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom(function = "e164_phone"))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub bio: Option<String>,
    #[validate(length(max = 255))]
    pub address: Option<String>,
    #[validate(length(max = 100))]
    pub job_title: Option<String>,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(max = 20))]
    pub zip_code: Option<String>,
    #[validate(length(max = 100))]
    pub city: Option<String>,
    #[validate(length(max = 100))]
    pub company_name: Option<String>,
    #[validate(custom(function = "tag_lengths"))]
    pub tag_preferences: Option<Vec<String>>,
    pub social_media: Option<serde_json::Value>,
}

impl From<UpdateProfileRequest> for UpdateProfileInput {
    fn from(r: UpdateProfileRequest) -> Self {
        Self {
            full_name: r.full_name,
            user_name: r.user_name,
            email: r.email,
            phone: r.phone,
            bio: r.bio,
            address: r.address,
            job_title: r.job_title,
            state: r.state,
            zip_code: r.zip_code,
            city: r.city,
            company_name: r.company_name,
            tag_preferences: r.tag_preferences,
            social_media: r.social_media,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct FollowRequest {
    #[validate(range(min = 1))]
    pub following_id: i64,
}

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub following: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeSubscriptionRequest {
    #[validate(range(min = 1))]
    pub subscription_id: i64,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: String,
    #[validate(range(min = 0.0))]
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfilePictureResponse {
    pub profile_picture: String,
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub message: String,
    pub deactivated_until: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/follow", post(follow))
        .route("/subscription", get(subscription_history).put(change_subscription))
        .route("/deactivate", delete(deactivate))
        .route("/delete", delete(delete_account))
        .route("/{id}", get(get_user).put(update_user))
        .route("/{id}/profile/picture", put(update_profile_picture))
        .route("/{id}/configuration", get(configuration))
}

/// GET /api/v1/users/{id}
async fn get_user(
    State(state): State<AppState>,
    AuthenticatedUser(viewer): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.users.get_profile(viewer.id, id).await?;
    Ok(Json(profile))
}

/// PUT /api/v1/users/{id}
async fn update_user(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<i64>,
    ValidatedJson(body): ValidatedJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.users.update_profile(actor.id, id, body.into()).await?;
    Ok(Json(user))
}

/// PUT /api/v1/users/{id}/profile/picture
async fn update_profile_picture(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<ProfilePictureResponse>, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let file = form
        .take_files("profile_picture")
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::bad_request("profile_picture file is required"))?;

    let url = state.users.set_profile_picture(actor.id, id, file).await?;
    Ok(Json(ProfilePictureResponse { profile_picture: url }))
}

/// GET /api/v1/users/{id}/configuration
async fn configuration(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.users.configuration(actor.id, id).await?;
    Ok(Json(config))
}

/// POST /api/v1/users/follow
async fn follow(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    ValidatedJson(body): ValidatedJson<FollowRequest>,
) -> Result<Json<FollowResponse>, ApiError> {
    let following = state.users.toggle_follow(actor.id, body.following_id).await?;
    Ok(Json(FollowResponse { following }))
}

/// PUT /api/v1/users/subscription
async fn change_subscription(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ValidatedJson(body): ValidatedJson<ChangeSubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .users
        .change_subscription(&user, body.subscription_id, &body.payment_method, body.amount)
        .await?;
    Ok(Json(subscription))
}

/// GET /api/v1/users/subscription
async fn subscription_history(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .users
        .subscription_history(
            user.id,
            query.start_date.as_deref().filter(|s| !s.is_empty()),
            query.end_date.as_deref().filter(|s| !s.is_empty()),
            query.search,
        )
        .await?;
    Ok(Json(serde_json::json!({ "subscriptions": rows })))
}

/// DELETE /api/v1/users/deactivate
async fn deactivate(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<DeactivateResponse>, ApiError> {
    let until = state.auth.deactivate(&user).await?;
    Ok(Json(DeactivateResponse {
        message: "Account deactivated".to_string(),
        deactivated_until: until.to_rfc3339(),
    }))
}

/// DELETE /api/v1/users/delete
async fn delete_account(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth.delete(&user).await?;
    Ok(MessageResponse::new("Account deleted"))
}
