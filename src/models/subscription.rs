//! Subscription tiers and the per-user subscription history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A storage plan.
///
/// `capacity_gb` bounds the total size of a user's media; `max_media_size_gb`
/// bounds a single upload request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionTier {
    pub id: i64,
    pub name: String,
    pub capacity_gb: f64,
    pub max_media_size_gb: f64,
    pub features: Vec<String>,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            _ => Err(anyhow::anyhow!("Invalid subscription status: {}", s)),
        }
    }
}

/// One row of a user's subscription history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    pub id: i64,
    pub user_id: i64,
    pub tier_id: i64,
    pub status: SubscriptionStatus,
    pub description: String,
    pub payment_method: String,
    pub amount: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: i64,
    pub tier_id: i64,
    pub description: String,
    pub payment_method: String,
    pub amount: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Filter for the subscription history listing
#[derive(Debug, Clone, Default)]
pub struct SubscriptionHistoryFilter {
    /// Restrict to one customer
    pub user_id: Option<i64>,
    /// Inclusive range on `created_at`
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Case-insensitive match on first or last name
    pub search: Option<String>,
}

/// History row joined with the customer and tier names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionHistoryEntry {
    pub customer_name: String,
    pub payment_method: String,
    pub tier_name: String,
    pub amount: f64,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
}
