//! Request body validation

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::api::middleware::ApiError;

/// JSON body that has passed its `validator` rules
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e.body_text())))?;

        value.validate().map_err(validation_failure)?;

        Ok(ValidatedJson(value))
    }
}

/// `VALIDATION_ERROR` with one list of messages per failing field
pub fn validation_failure(errors: ValidationErrors) -> ApiError {
    let mut details = serde_json::Map::new();
    for (field, errs) in errors.field_errors() {
        let messages: Vec<String> = errs
            .iter()
            .map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string())
            })
            .collect();
        details.insert(field.to_string(), serde_json::json!(messages));
    }
    ApiError::with_details(
        "VALIDATION_ERROR",
        "Validation failed",
        serde_json::Value::Object(details),
    )
}

/// Reject strings that are blank after trimming
pub fn not_blank(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        return Err(validator::ValidationError::new("not_blank").with_message("Must not be empty".into()));
    }
    Ok(())
}

/// E.164: a plus sign followed by 8 to 15 digits, no leading zero
static E164_PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9][0-9]{7,14}$").expect("phone pattern"));
static ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]*$").expect("alphanumeric pattern"));

pub fn e164_phone(value: &str) -> Result<(), validator::ValidationError> {
    if !E164_PHONE.is_match(value) {
        return Err(validator::ValidationError::new("e164")
            .with_message("Phone number must be in E.164 format".into()));
    }
    Ok(())
}

pub fn alphanumeric(value: &str) -> Result<(), validator::ValidationError> {
    if !ALPHANUMERIC.is_match(value) {
        return Err(validator::ValidationError::new("alphanumeric")
            .with_message("Only letters and digits are allowed".into()));
    }
    Ok(())
}

/// Each tag preference is at most 50 characters
pub fn tag_lengths(tags: &[String]) -> Result<(), validator::ValidationError> {
    if tags.iter().any(|t| t.chars().count() > 50) {
        return Err(validator::ValidationError::new("tag_length")
            .with_message("Each tag must be at most 50 characters".into()));
    }
    Ok(())
}
