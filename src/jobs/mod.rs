//! Background sweeps
//!
//! Album retention and subscription expiry run once a day at a configured
//! UTC hour. Expired temporary uploads are purged every five minutes.
//! A failed run is logged and the loop carries on.

use crate::config::JobsConfig;
use crate::db::repositories::SubscriptionRepository;
use crate::services::album::AlbumService;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

const TEMP_PURGE_EVERY: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Time from `now` until the next `hour:00` UTC (tomorrow if already past)
pub fn delay_until_hour(now: DateTime<Utc>, hour: u32) -> std::time::Duration {
    let at = NaiveTime::from_hms_opt(hour % 24, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut next = now.date_naive().and_time(at).and_utc();
    if next <= now {
        next += Duration::days(1);
    }
    (next - now).to_std().unwrap_or_default()
}

pub struct Jobs {
    albums: Arc<AlbumService>,
    subscription_repo: Arc<dyn SubscriptionRepository>,
    config: JobsConfig,
}

impl Jobs {
    pub fn new(
        albums: Arc<AlbumService>,
        subscription_repo: Arc<dyn SubscriptionRepository>,
        config: JobsConfig,
    ) -> Self {
        Self {
            albums,
            subscription_repo,
            config,
        }
    }

    /// Remove albums nobody has updated within the retention window
    pub async fn run_album_retention(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.config.album_retention_days);
        let removed = self
            .albums
            .purge_stale(cutoff)
            .await
            .context("Album retention sweep failed")?;
        tracing::info!("Album retention: removed {} albums not updated since {}", removed, cutoff);
        Ok(removed)
    }

    pub async fn run_subscription_expiry(&self) -> Result<u64> {
        let expired = self
            .subscription_repo
            .expire_ended(Utc::now())
            .await
            .context("Subscription expiry sweep failed")?;
        tracing::info!("Subscription expiry: {} subscriptions expired", expired);
        Ok(expired)
    }

    pub async fn run_temp_purge(&self) -> Result<usize> {
        let purged = self
            .albums
            .purge_expired_temp(Utc::now())
            .await
            .context("Temporary upload purge failed")?;
        if purged > 0 {
            tracing::info!("Purged {} expired temporary uploads", purged);
        }
        Ok(purged)
    }

    /// Start every sweep loop
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let retention = {
            let jobs = self.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(delay_until_hour(Utc::now(), jobs.config.cleanup_hour)).await;
                    if let Err(e) = jobs.run_album_retention().await {
                        tracing::error!("{:#}", e);
                    }
                }
            })
        };

        let expiry = {
            let jobs = self.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(delay_until_hour(Utc::now(), jobs.config.subscription_sweep_hour)).await;
                    if let Err(e) = jobs.run_subscription_expiry().await {
                        tracing::error!("{:#}", e);
                    }
                }
            })
        };

        let temp = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TEMP_PURGE_EVERY);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_temp_purge().await {
                    tracing::error!("{:#}", e);
                }
            }
        });

        tracing::info!("Background jobs scheduled");
        vec![retention, expiry, temp]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::repositories::{
        SqlxAlbumRepository, SqlxCommentRepository, SqlxMediaRepository,
        SqlxSubscriptionRepository, SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{CreateUserInput, NewSubscription, PrivacyMode};
    use crate::services::album::NewAlbumRequest;
    use crate::services::notification::{LogDispatcher, NotificationQueue};
    use crate::storage::{LocalObjectStorage, ObjectStorage, UploadedFile};
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweeps_against_database() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().to_path_buf();
        // Everything counts as stale or expired right away
        config.jobs.album_retention_days = -1;
        config.jobs.temp_media_ttl_minutes = -1;

        let users = SqlxUserRepository::boxed(pool.clone());
        let subs = SqlxSubscriptionRepository::boxed(pool.clone());
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalObjectStorage::from_config(&config.storage));
        let (notifier, _worker) =
            NotificationQueue::start(Arc::new(LogDispatcher), std::time::Duration::from_secs(1));
        let albums = Arc::new(AlbumService::new(
            SqlxAlbumRepository::boxed(pool.clone()),
            SqlxMediaRepository::boxed(pool.clone()),
            SqlxCommentRepository::boxed(pool.clone()),
            users.clone(),
            storage,
            notifier,
            &config,
        ));

        let owner = users
            .create(&CreateUserInput {
                first_name: "Jo".to_string(),
                last_name: "Doe".to_string(),
                email: "jo@example.com".to_string(),
                password_hash: "hash".to_string(),
                subscription_tier_id: 1,
            })
            .await
            .unwrap();

        let now = Utc::now();
        for (days_left, description) in [(-1, "Lapsed"), (10, "Running")] {
            subs.create(&NewSubscription {
                user_id: owner.id,
                tier_id: 1,
                description: description.to_string(),
                payment_method: "free".to_string(),
                amount: 0.0,
                start_date: now - Duration::days(30),
                end_date: now + Duration::days(days_left),
            })
            .await
            .unwrap();
        }

        albums
            .create(
                &owner,
                NewAlbumRequest {
                    title: "Old".to_string(),
                    privacy: PrivacyMode::Public,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        albums
            .upload_temp(UploadedFile::new("t.png", "image/png", vec![1; 16]), "127.0.0.1")
            .await
            .unwrap();

        let jobs = Jobs::new(albums, subs.clone(), config.jobs.clone());
        assert_eq!(jobs.run_subscription_expiry().await.unwrap(), 1);
        assert_eq!(jobs.run_subscription_expiry().await.unwrap(), 0);
        assert_eq!(
            subs.active_for_user(owner.id).await.unwrap().unwrap().description,
            "Running"
        );

        assert_eq!(jobs.run_album_retention().await.unwrap(), 1);
        assert_eq!(jobs.run_album_retention().await.unwrap(), 0);

        assert_eq!(jobs.run_temp_purge().await.unwrap(), 1);
        assert_eq!(jobs.run_temp_purge().await.unwrap(), 0);
    }

    #[test]
    fn test_delay_until_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).unwrap();
        assert_eq!(delay_until_hour(now, 2).as_secs(), 90 * 60);
    }

    #[test]
    fn test_delay_rolls_over_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap();
        assert_eq!(delay_until_hour(now, 2).as_secs(), 24 * 3600);

        let late = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();
        assert_eq!(delay_until_hour(late, 0).as_secs(), 60);
    }

    #[test]
    fn test_out_of_range_hour_wraps() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(delay_until_hour(now, 25).as_secs(), 3600);
    }
}
