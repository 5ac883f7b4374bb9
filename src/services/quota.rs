//! Storage quota
//!
//! Two gates protect uploads. The capacity gate refuses any upload once the
//! owner's media already fills their tier. The body-limit gate refuses a
//! request whose declared length exceeds the tier's single-media size.
//!
//! Enforcement is soft: usage is read before the upload and nothing holds it
//! until the media row is written.

use crate::config::BodyLimitScaling;
use crate::db::repositories::{MediaRepository, SubscriptionRepository, UserRepository};
use crate::models::SubscriptionTier;
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;

const MB_PER_GB: f64 = 1024.0;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Storage capacity is full. Maximum {capacity_gb:.2} GB")]
    QuotaExceeded { capacity_gb: f64 },

    #[error("File is too large. Maximum {max_media_size_gb} GB")]
    FileTooLarge { max_media_size_gb: f64 },

    #[error("Subscription tier {0} could not be resolved")]
    TierResolution(i64),

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Largest request body accepted for `tier`, in bytes.
///
/// `Corrected` reads the tier value as GiB. `Observed` is the legacy
/// multiplier (a hundred times the MB value) kept for deployments that rely
/// on it.
pub fn max_body_bytes(tier: &SubscriptionTier, scaling: BodyLimitScaling) -> u64 {
    let factor = match scaling {
        BodyLimitScaling::Observed => 1024.0 * 1024.0 * 100.0,
        BodyLimitScaling::Corrected => 1024.0 * 1024.0 * 1024.0,
    };
    (tier.max_media_size_gb * factor) as u64
}

/// Refuse when `used_mb` already reaches the tier capacity.
pub fn check_capacity(tier: &SubscriptionTier, used_mb: f64) -> Result<(), QuotaError> {
    let capacity_mb = tier.capacity_gb * MB_PER_GB;
    if capacity_mb > 0.0 && used_mb / capacity_mb >= 1.0 {
        return Err(QuotaError::QuotaExceeded {
            capacity_gb: tier.capacity_gb,
        });
    }
    Ok(())
}

/// Refuse a declared body larger than the tier allows.
pub fn check_body_limit(
    tier: &SubscriptionTier,
    content_length: u64,
    scaling: BodyLimitScaling,
) -> Result<(), QuotaError> {
    if content_length > max_body_bytes(tier, scaling) {
        return Err(QuotaError::FileTooLarge {
            max_media_size_gb: tier.max_media_size_gb,
        });
    }
    Ok(())
}

/// Non-blocking usage summary shown on profiles
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageReport {
    /// `"%.2f MB"` under 1 GB, `"%.2f GB"` from there on
    pub storage_used: String,
    pub storage_capacity: String,
    /// Clamped to [0, 100]
    pub storage_percentage: f64,
    pub is_storage_full: bool,
}

pub fn report(tier: &SubscriptionTier, used_mb: f64) -> StorageReport {
    let capacity_mb = tier.capacity_gb * MB_PER_GB;
    let percentage = if capacity_mb > 0.0 {
        (used_mb / capacity_mb * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    StorageReport {
        storage_used: format_size(used_mb),
        storage_capacity: format!("{:.2} GB", tier.capacity_gb),
        storage_percentage: percentage,
        is_storage_full: percentage >= 100.0,
    }
}

pub fn format_size(mb: f64) -> String {
    if mb < MB_PER_GB {
        format!("{:.2} MB", mb)
    } else {
        format!("{:.2} GB", mb / MB_PER_GB)
    }
}

/// Resolves a user's tier and usage for the two gates and the report
pub struct QuotaService {
    user_repo: Arc<dyn UserRepository>,
    subscription_repo: Arc<dyn SubscriptionRepository>,
    media_repo: Arc<dyn MediaRepository>,
    scaling: BodyLimitScaling,
}

impl QuotaService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        subscription_repo: Arc<dyn SubscriptionRepository>,
        media_repo: Arc<dyn MediaRepository>,
        scaling: BodyLimitScaling,
    ) -> Self {
        Self {
            user_repo,
            subscription_repo,
            media_repo,
            scaling,
        }
    }

    pub async fn tier_for(&self, user_id: i64) -> Result<SubscriptionTier, QuotaError> {
        let user = self
            .user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to load user")?
            .ok_or(QuotaError::UserNotFound(user_id))?;

        self.subscription_repo
            .get_tier(user.subscription_tier_id)
            .await
            .context("Failed to load subscription tier")?
            .ok_or(QuotaError::TierResolution(user.subscription_tier_id))
    }

    pub async fn used_mb(&self, user_id: i64) -> Result<f64, QuotaError> {
        Ok(self
            .media_repo
            .sum_sizes_by_owner(user_id)
            .await
            .context("Failed to sum media sizes")?)
    }

    /// Capacity gate for upload routes
    pub async fn ensure_capacity(&self, user_id: i64) -> Result<(), QuotaError> {
        let tier = self.tier_for(user_id).await?;
        let used = self.used_mb(user_id).await?;
        let result = check_capacity(&tier, used);
        if result.is_err() {
            tracing::info!(
                "User {} is at capacity: {:.2} MB used of {} GB",
                user_id,
                used,
                tier.capacity_gb
            );
        }
        result
    }

    /// Body-limit gate for upload routes; returns the byte limit that applies
    pub async fn ensure_body_limit(&self, user_id: i64, content_length: u64) -> Result<u64, QuotaError> {
        let tier = self.tier_for(user_id).await?;
        check_body_limit(&tier, content_length, self.scaling)?;
        Ok(max_body_bytes(&tier, self.scaling))
    }

    pub async fn report_for(&self, user_id: i64) -> Result<StorageReport, QuotaError> {
        let tier = self.tier_for(user_id).await?;
        let used = self.used_mb(user_id).await?;
        Ok(report(&tier, used))
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn tier(capacity_gb: f64) -> SubscriptionTier {
        SubscriptionTier {
            id: 1,
            name: "P".to_string(),
            capacity_gb,
            max_media_size_gb: 1.0,
            features: vec![],
            price: 0.0,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_capacity_gate_matches_ratio(capacity in 1u32..2000, used in 0.0f64..3_000_000.0) {
            let t = tier(capacity as f64);
            let denied = check_capacity(&t, used).is_err();
            prop_assert_eq!(denied, used >= capacity as f64 * 1024.0);
        }

        #[test]
        fn prop_report_percentage_is_clamped(capacity in 1u32..2000, used in 0.0f64..5_000_000.0) {
            let r = report(&tier(capacity as f64), used);
            prop_assert!(r.storage_percentage >= 0.0 && r.storage_percentage <= 100.0);
            prop_assert_eq!(r.is_storage_full, r.storage_percentage >= 100.0);
        }

        #[test]
        fn prop_report_full_iff_gate_denies(capacity in 1u32..2000, used in 0.0f64..3_000_000.0) {
            let t = tier(capacity as f64);
            prop_assert_eq!(report(&t, used).is_storage_full, check_capacity(&t, used).is_err());
        }
    }
}
