//! User service
//!
//! Profiles, avatars, follows and subscription changes. Account lifecycle
//! (signup, login, deactivation) lives in the auth service.

use crate::db::repositories::{SubscriptionRepository, UserRepository};
use crate::models::{
    AccountConfig, NewSubscription, SubscriptionHistoryEntry, SubscriptionHistoryFilter,
    SubscriptionTier, UpdateProfileInput, User, UserStats, UserSubscription,
};
use crate::services::notification::{NotificationKind, NotificationMessage, NotificationQueue};
use crate::services::quota::{QuotaError, QuotaService, StorageReport};
use crate::storage::{avatar_key, presign_or_raw, ObjectStorage, StorageError, UploadedFile};
use anyhow::Context;
use chrono::{Duration, Months, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("User not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("Subscription tier {0} not found")]
    TierNotFound(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Profile page payload
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    /// Presigned avatar link
    pub profile_picture: Option<String>,
    pub tier: SubscriptionTier,
    pub is_following: bool,
    pub stats: UserStats,
    pub storage: StorageReport,
}

/// One row of the subscription history listing
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionHistoryRow {
    pub customer_name: String,
    pub payment_method: String,
    pub tier_name: String,
    pub amount: f64,
    pub status: String,
    pub created_at: String,
}

impl From<SubscriptionHistoryEntry> for SubscriptionHistoryRow {
    fn from(entry: SubscriptionHistoryEntry) -> Self {
        Self {
            customer_name: entry.customer_name,
            payment_method: entry.payment_method,
            tier_name: entry.tier_name,
            amount: entry.amount,
            status: entry.status.to_string(),
            created_at: entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Parse the optional `YYYY-MM-DD` pair into an inclusive UTC range.
///
/// Both ends must be given together.
pub fn parse_date_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>, UserError> {
    let (start, end) = match (start, end) {
        (None, None) => return Ok(None),
        (Some(start), Some(end)) => (start, end),
        _ => {
            return Err(UserError::Validation(
                "start_date and end_date must be provided together".to_string(),
            ))
        }
    };

    let parse = |s: &str| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| UserError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", s)))
    };
    let start = parse(start)?;
    let end = parse(end)?;

    let from = start
        .and_hms_opt(0, 0, 0)
        .map(|t| Utc.from_utc_datetime(&t))
        .ok_or_else(|| UserError::Validation("Invalid start_date".to_string()))?;
    let to = end
        .and_hms_opt(23, 59, 59)
        .map(|t| Utc.from_utc_datetime(&t))
        .ok_or_else(|| UserError::Validation("Invalid end_date".to_string()))?;
    Ok(Some((from, to)))
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    subscription_repo: Arc<dyn SubscriptionRepository>,
    quota: Arc<QuotaService>,
    storage: Arc<dyn ObjectStorage>,
    notifier: NotificationQueue,
    presign_ttl: std::time::Duration,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        subscription_repo: Arc<dyn SubscriptionRepository>,
        quota: Arc<QuotaService>,
        storage: Arc<dyn ObjectStorage>,
        notifier: NotificationQueue,
        presign_ttl: std::time::Duration,
    ) -> Self {
        Self {
            user_repo,
            subscription_repo,
            quota,
            storage,
            notifier,
            presign_ttl,
        }
    }

    async fn load(&self, id: i64) -> Result<User, UserError> {
        self.user_repo
            .get_by_id(id)
            .await
            .context("Failed to load user")?
            .filter(|u| !u.is_deleted())
            .ok_or(UserError::NotFound)
    }

    fn ensure_self(actor_id: i64, target_id: i64) -> Result<(), UserError> {
        if actor_id != target_id {
            return Err(UserError::Forbidden(
                "You can only access your own account".to_string(),
            ));
        }
        Ok(())
    }

    fn presign(&self, url: Option<&str>) -> Option<String> {
        url.map(|u| presign_or_raw(self.storage.as_ref(), u, self.presign_ttl))
    }

    /// Profile, tier, follow state and usage of `target_id` as seen by `viewer_id`
    pub async fn get_profile(&self, viewer_id: i64, target_id: i64) -> Result<UserProfile, UserError> {
        let user = self.load(target_id).await?;

        let tier = self.quota.tier_for(user.id).await?;
        let storage = self.quota.report_for(user.id).await?;
        let stats = self
            .user_repo
            .stats(user.id)
            .await
            .context("Failed to load user stats")?;
        let is_following = viewer_id != user.id
            && self
                .user_repo
                .is_following(viewer_id, user.id)
                .await
                .context("Failed to check follow state")?;

        Ok(UserProfile {
            profile_picture: self.presign(user.profile_picture.as_deref()),
            user,
            tier,
            is_following,
            stats,
            storage,
        })
    }

    pub async fn update_profile(
        &self,
        actor_id: i64,
        target_id: i64,
        mut input: UpdateProfileInput,
    ) -> Result<User, UserError> {
        Self::ensure_self(actor_id, target_id)?;
        self.load(target_id).await?;

        if let Some(email) = input.email.take() {
            let email = email.trim().to_lowercase();
            let taken = self
                .user_repo
                .get_by_email(&email)
                .await
                .context("Failed to check email")?
                .is_some_and(|other| other.id != target_id);
            if taken {
                return Err(UserError::Conflict("Email is already in use".to_string()));
            }
            input.email = Some(email);
        }

        if let Some(user_name) = &input.user_name {
            let taken = self
                .user_repo
                .get_by_user_name(user_name)
                .await
                .context("Failed to check user name")?
                .is_some_and(|other| other.id != target_id);
            if taken {
                return Err(UserError::Conflict("User name is already taken".to_string()));
            }
        }

        Ok(self
            .user_repo
            .update_profile(target_id, &input)
            .await
            .context("Failed to update profile")?)
    }

    /// Store a new avatar, drop the old object and return a presigned link
    pub async fn set_profile_picture(
        &self,
        actor_id: i64,
        target_id: i64,
        file: UploadedFile,
    ) -> Result<String, UserError> {
        Self::ensure_self(actor_id, target_id)?;
        let user = self.load(target_id).await?;

        if !file.content_type.starts_with("image/") {
            return Err(UserError::Validation(
                "Profile picture must be an image".to_string(),
            ));
        }

        let key = avatar_key(user.id, &file.extension());
        let stored = self.storage.put(&key, &file.bytes, &file.content_type).await?;
        self.user_repo
            .set_profile_picture(user.id, Some(&stored.url))
            .await
            .context("Failed to save profile picture")?;

        if let Some(previous) = user.profile_picture.as_deref() {
            if let Err(e) = self.storage.delete(previous).await {
                tracing::warn!("Failed to delete old profile picture of user {}: {}", user.id, e);
            }
        }

        Ok(presign_or_raw(self.storage.as_ref(), &stored.url, self.presign_ttl))
    }

    pub async fn configuration(&self, actor_id: i64, target_id: i64) -> Result<AccountConfig, UserError> {
        Self::ensure_self(actor_id, target_id)?;
        Ok(self
            .user_repo
            .get_account_config(target_id)
            .await
            .context("Failed to load account configuration")?)
    }

    /// Follow or unfollow; returns true when `follower_id` now follows
    pub async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<bool, UserError> {
        if follower_id == following_id {
            return Err(UserError::Validation("You cannot follow yourself".to_string()));
        }
        self.load(following_id).await?;

        Ok(self
            .user_repo
            .toggle_follow(follower_id, following_id)
            .await
            .context("Failed to toggle follow")?)
    }

    /// Move the user onto `tier_id` for one month
    pub async fn change_subscription(
        &self,
        user: &User,
        tier_id: i64,
        payment_method: &str,
        amount: f64,
    ) -> Result<UserSubscription, UserError> {
        let tier = self
            .subscription_repo
            .get_tier(tier_id)
            .await
            .context("Failed to load subscription tier")?
            .ok_or(UserError::TierNotFound(tier_id))?;

        let start = Utc::now();
        let end = start
            .checked_add_months(Months::new(1))
            .unwrap_or(start + Duration::days(30));

        let subscription = self
            .subscription_repo
            .replace_active(&NewSubscription {
                user_id: user.id,
                tier_id: tier.id,
                description: tier.name.clone(),
                payment_method: payment_method.to_string(),
                amount,
                start_date: start,
                end_date: end,
            })
            .await
            .context("Failed to change subscription")?;

        tracing::info!("User {} moved to tier {}", user.id, tier.name);
        self.notifier.submit(
            NotificationMessage::new(
                NotificationKind::Subscription,
                &user.email,
                format!("Your {} subscription", tier.name),
            )
            .name(user.display_name())
            .body(format!("You are now on the {} plan.", tier.name))
            .meta("tier", &tier.name)
            .meta("amount", format!("{:.2}", amount))
            .meta("end_date", end.format("%Y-%m-%d")),
        );

        Ok(subscription)
    }

    /// The user's own subscription history, newest first
    pub async fn subscription_history(
        &self,
        user_id: i64,
        start_date: Option<&str>,
        end_date: Option<&str>,
        search: Option<String>,
    ) -> Result<Vec<SubscriptionHistoryRow>, UserError> {
        let filter = SubscriptionHistoryFilter {
            user_id: Some(user_id),
            range: parse_date_range(start_date, end_date)?,
            search: search.filter(|s| !s.trim().is_empty()),
        };

        let entries = self
            .subscription_repo
            .history(&filter)
            .await
            .context("Failed to load subscription history")?;
        Ok(entries.into_iter().map(SubscriptionHistoryRow::from).collect())
    }
}
