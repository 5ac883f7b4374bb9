//! Issued token pairs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored access/refresh token pair.
///
/// A JWT is accepted only while a matching row exists and is not revoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub ip_address: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct NewAccessToken {
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub ip_address: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}
