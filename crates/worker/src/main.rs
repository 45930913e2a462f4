use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sessionstate_store::{PgRecordStore, SessionStateStore, StoreConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sessionstate_worker=debug,sessionstate_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = StoreConfig::from_env()?;
    tracing::info!(
        application = %config.application_name,
        timeout_minutes = config.session_timeout_minutes,
        cleanup_interval_minutes = config.cleanup_interval_minutes,
        "Loaded session store configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = sessionstate_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    sessionstate_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database connection established");

    sessionstate_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // --- Session store ---
    let store = Arc::new(PgRecordStore::new(pool));
    let sessions = SessionStateStore::open(store, config).await?;

    let cancel = CancellationToken::new();
    let reaper_handle = sessions.spawn_reaper(cancel.clone());
    tracing::info!(
        application_id = sessions.application_id(),
        period_secs = sessions.reaper().period().as_secs(),
        "Session worker running"
    );

    shutdown_signal().await;

    cancel.cancel();
    match tokio::time::timeout(Duration::from_secs(5), reaper_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Session reaper task failed"),
        Err(_) => tracing::warn!("Session reaper did not stop within 5s"),
    }
    tracing::info!("Session worker stopped");

    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
