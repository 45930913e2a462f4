//! Repository for the `session_states` table.
//!
//! Every mutating statement is scoped to one primary key and carries its
//! own guard in the `WHERE` clause, so Postgres row locking alone
//! linearizes concurrent requests for the same session.

use sessionstate_core::session::INITIAL_LOCK_ID;
use sessionstate_core::types::{DbId, LockId};
use sqlx::PgPool;

use crate::models::session_state::{
    ExpiredSessionRow, LockedSessionRow, SessionStateSnapshot, UpsertSessionState,
};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "application_id, session_id, created, expires, lock_date, lock_id, \
                       timeout, locked, session_items, flags";

/// Provides the conditional statements behind the session lock protocol.
pub struct SessionStateRepo;

impl SessionStateRepo {
    /// Take the exclusive lock if the row is unlocked and unexpired.
    ///
    /// The same statement bumps `lock_id` by one and clears the flags, so
    /// the returned token belongs to this caller alone. `None` means the
    /// row is locked, expired or absent.
    pub async fn try_lock(
        pool: &PgPool,
        application_id: DbId,
        session_id: &str,
    ) -> Result<Option<LockedSessionRow>, sqlx::Error> {
        sqlx::query_as::<_, LockedSessionRow>(
            "WITH prior AS ( \
                 SELECT application_id, session_id, flags FROM session_states \
                 WHERE application_id = $1 AND session_id = $2 \
                 FOR UPDATE \
             ) \
             UPDATE session_states s \
             SET locked = true, lock_date = NOW(), lock_id = s.lock_id + 1, flags = 0 \
             FROM prior \
             WHERE s.application_id = prior.application_id \
               AND s.session_id = prior.session_id \
               AND s.locked = false AND s.expires > NOW() \
             RETURNING NOW() AS now, prior.flags AS prior_flags, \
                 s.application_id, s.session_id, s.created, s.expires, s.lock_date, \
                 s.lock_id, s.timeout, s.locked, s.session_items, s.flags",
        )
        .bind(application_id)
        .bind(session_id)
        .fetch_optional(pool)
        .await
    }

    /// Read a row together with the server clock.
    pub async fn find(
        pool: &PgPool,
        application_id: DbId,
        session_id: &str,
    ) -> Result<Option<SessionStateSnapshot>, sqlx::Error> {
        let query = format!(
            "SELECT NOW() AS now, {COLUMNS} FROM session_states \
             WHERE application_id = $1 AND session_id = $2"
        );
        sqlx::query_as::<_, SessionStateSnapshot>(&query)
            .bind(application_id)
            .bind(session_id)
            .fetch_optional(pool)
            .await
    }

    /// Unlock and push out the expiry, if `lock_id` still matches.
    pub async fn release(
        pool: &PgPool,
        application_id: DbId,
        session_id: &str,
        lock_id: LockId,
        timeout: i32,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE session_states \
             SET locked = false, expires = NOW() + make_interval(mins => $4) \
             WHERE application_id = $1 AND session_id = $2 AND lock_id = $3",
        )
        .bind(application_id)
        .bind(session_id)
        .bind(lock_id)
        .bind(timeout)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Like [`release`](Self::release) but also stores new items and timeout.
    pub async fn release_with_items(
        pool: &PgPool,
        application_id: DbId,
        session_id: &str,
        lock_id: LockId,
        timeout: i32,
        session_items: &[u8],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE session_states \
             SET locked = false, expires = NOW() + make_interval(mins => $4), \
                 timeout = $4, session_items = $5 \
             WHERE application_id = $1 AND session_id = $2 AND lock_id = $3",
        )
        .bind(application_id)
        .bind(session_id)
        .bind(lock_id)
        .bind(timeout)
        .bind(session_items)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reset the idle timeout without checking the lock token.
    pub async fn touch(
        pool: &PgPool,
        application_id: DbId,
        session_id: &str,
        timeout: i32,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE session_states SET expires = NOW() + make_interval(mins => $3) \
             WHERE application_id = $1 AND session_id = $2",
        )
        .bind(application_id)
        .bind(session_id)
        .bind(timeout)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Insert a row, or overwrite every column of an existing one.
    ///
    /// An expired row with the same key is replaced rather than merged.
    pub async fn upsert(pool: &PgPool, input: &UpsertSessionState) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO session_states \
                 (application_id, session_id, created, expires, lock_date, \
                  lock_id, timeout, locked, session_items, flags) \
             VALUES ($1, $2, NOW(), NOW() + make_interval(mins => $3), NOW(), \
                     $4, $3, false, $5, $6) \
             ON CONFLICT (application_id, session_id) DO UPDATE SET \
                 created = EXCLUDED.created, expires = EXCLUDED.expires, \
                 lock_date = EXCLUDED.lock_date, lock_id = EXCLUDED.lock_id, \
                 timeout = EXCLUDED.timeout, locked = EXCLUDED.locked, \
                 session_items = EXCLUDED.session_items, flags = EXCLUDED.flags",
        )
        .bind(input.application_id)
        .bind(&input.session_id)
        .bind(input.timeout)
        .bind(INITIAL_LOCK_ID)
        .bind(&input.session_items)
        .bind(input.flags)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete a row held under `lock_id`. Returns `1` if it was removed.
    pub async fn delete_with_lock(
        pool: &PgPool,
        application_id: DbId,
        session_id: &str,
        lock_id: LockId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM session_states \
             WHERE application_id = $1 AND session_id = $2 AND lock_id = $3",
        )
        .bind(application_id)
        .bind(session_id)
        .bind(lock_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List ids and payloads of every expired row of an application.
    pub async fn list_expired(
        pool: &PgPool,
        application_id: DbId,
    ) -> Result<Vec<ExpiredSessionRow>, sqlx::Error> {
        sqlx::query_as::<_, ExpiredSessionRow>(
            "SELECT session_id, timeout, session_items FROM session_states \
             WHERE application_id = $1 AND expires <= NOW() \
             ORDER BY expires",
        )
        .bind(application_id)
        .fetch_all(pool)
        .await
    }

    /// Delete one row only if it is still expired.
    ///
    /// A session touched between the scan and this statement survives.
    pub async fn delete_if_expired(
        pool: &PgPool,
        application_id: DbId,
        session_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM session_states \
             WHERE application_id = $1 AND session_id = $2 AND expires <= NOW()",
        )
        .bind(application_id)
        .bind(session_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete every expired row of an application in one statement.
    pub async fn delete_expired(pool: &PgPool, application_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM session_states WHERE application_id = $1 AND expires <= NOW()",
        )
        .bind(application_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
