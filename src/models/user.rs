//! User model
//!
//! Accounts, their two-factor configuration and follow statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    /// Display name chosen by the user; falls back to first + last name
    pub full_name: Option<String>,
    /// Unique handle
    pub user_name: Option<String>,
    pub email: String,
    /// Argon2 PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub job_title: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub company_name: Option<String>,
    /// Stored object URL of the avatar (never served directly)
    #[serde(skip_serializing)]
    pub profile_picture: Option<String>,
    pub tag_preferences: Vec<String>,
    pub social_media: Option<serde_json::Value>,
    /// Current subscription tier
    pub subscription_tier_id: i64,
    pub status: UserStatus,
    pub deactivated_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name shown to other users
    pub fn display_name(&self) -> String {
        match &self.full_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == UserStatus::Deleted
    }

    pub fn is_deactivated(&self) -> bool {
        self.status == UserStatus::Deactivated
    }
}

/// Account lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    /// Temporarily disabled; logging in again reactivates the account
    Deactivated,
    /// Permanently closed; login is refused
    Deleted,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserStatus::Active => "active",
            UserStatus::Deactivated => "deactivated",
            UserStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "deactivated" => Ok(UserStatus::Deactivated),
            "deleted" => Ok(UserStatus::Deleted),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

/// Values needed to insert a new account (password already hashed)
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub subscription_tier_id: i64,
}

/// Partial profile update; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct UpdateProfileInput {
    pub full_name: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub job_title: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub company_name: Option<String>,
    pub tag_preferences: Option<Vec<String>>,
    pub social_media: Option<serde_json::Value>,
}

/// Per-user security settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountConfig {
    pub user_id: i64,
    pub two_factor_enabled: bool,
    pub two_factor_method: Option<String>,
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
}

/// Follower and media counters shown on a profile
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub media_count: i64,
    pub followers: i64,
    pub following: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: 1,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            full_name: None,
            user_name: None,
            email: "ada@example.com".to_string(),
            password_hash: "hash".to_string(),
            phone: None,
            bio: None,
            address: None,
            job_title: None,
            state: None,
            zip_code: None,
            city: None,
            company_name: None,
            profile_picture: None,
            tag_preferences: vec![],
            social_media: None,
            subscription_tier_id: 1,
            status: UserStatus::Active,
            deactivated_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_display_name_falls_back_to_first_and_last() {
        let mut user = sample_user();
        assert_eq!(user.display_name(), "Ada Lovelace");

        user.full_name = Some("  ".to_string());
        assert_eq!(user.display_name(), "Ada Lovelace");

        user.full_name = Some("Countess Ada".to_string());
        assert_eq!(user.display_name(), "Countess Ada");
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [UserStatus::Active, UserStatus::Deactivated, UserStatus::Deleted] {
            assert_eq!(status.to_string().parse::<UserStatus>().unwrap(), status);
        }
        assert!("banned".parse::<UserStatus>().is_err());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(sample_user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("profile_picture").is_none());
        assert_eq!(json["status"], "active");
    }
}
