//! Repository for the `session_cleanup` throttle table.

use sessionstate_core::types::DbId;
use sqlx::PgPool;

use crate::models::session_cleanup::SessionCleanup;

/// Provides the throttle row operations for the expired-session sweep.
pub struct SessionCleanupRepo;

impl SessionCleanupRepo {
    /// Create the throttle row if it does not exist yet.
    ///
    /// Concurrent first-time initializations race harmlessly: the loser's
    /// insert is ignored and an existing interval is never overwritten.
    pub async fn ensure(
        pool: &PgPool,
        application_id: DbId,
        interval_minutes: i32,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO session_cleanup (application_id, last_run, interval_minutes) \
             VALUES ($1, NOW(), $2) \
             ON CONFLICT (application_id) DO NOTHING",
        )
        .bind(application_id)
        .bind(interval_minutes)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Find the throttle row of an application.
    pub async fn find(
        pool: &PgPool,
        application_id: DbId,
    ) -> Result<Option<SessionCleanup>, sqlx::Error> {
        sqlx::query_as::<_, SessionCleanup>(
            "SELECT application_id, last_run, interval_minutes FROM session_cleanup \
             WHERE application_id = $1",
        )
        .bind(application_id)
        .fetch_optional(pool)
        .await
    }

    /// Claim the next sweep if the interval has elapsed.
    ///
    /// Returns `1` for exactly one caller per interval across all processes.
    pub async fn try_claim(pool: &PgPool, application_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE session_cleanup SET last_run = NOW() \
             WHERE application_id = $1 \
               AND last_run + make_interval(mins => interval_minutes) < NOW()",
        )
        .bind(application_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
