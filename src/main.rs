//! AlbumVault - album sharing backend

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use albumvault::{
    api::{self, AppState},
    config::Config,
    db::{self, repositories::SqlxSubscriptionRepository},
    jobs::Jobs,
    services::{dispatcher_from_config, NotificationQueue},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "albumvault=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AlbumVault...");

    let config = Arc::new(Config::load_with_env(Path::new("config.yml"))?);
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let dispatcher = dispatcher_from_config(&config.notification)?;
    let (notifier, _notification_worker) = NotificationQueue::start(
        dispatcher,
        Duration::from_secs(config.notification.timeout_secs),
    );

    let state = AppState::new(pool.clone(), config.clone(), notifier);

    // Start rate limiter cleanup task (runs every 5 minutes)
    {
        let limiter = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.cleanup().await;
            }
        });
    }

    let jobs = Arc::new(Jobs::new(
        state.albums.clone(),
        SqlxSubscriptionRepository::boxed(pool),
        config.jobs.clone(),
    ));
    let _job_handles = jobs.spawn();

    let app = api::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
