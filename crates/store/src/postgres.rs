//! Record store over the `session_states` and `session_cleanup` tables.

use async_trait::async_trait;
use sessionstate_core::session::{SessionFlags, SessionKey, SessionRecord};
use sessionstate_core::types::{DbId, LockId};
use sessionstate_db::models::session_state::UpsertSessionState;
use sessionstate_db::repositories::{ApplicationRepo, SessionCleanupRepo, SessionStateRepo};
use sessionstate_db::DbPool;

use crate::error::StoreResult;
use crate::record_store::{ExpiredSession, LockGrant, NewSession, RecordStore, StoredSession};

/// [`RecordStore`] backed by PostgreSQL. Cheap to clone.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: DbPool,
}

impl PgRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn try_lock(&self, key: &SessionKey) -> StoreResult<Option<LockGrant>> {
        let locked =
            SessionStateRepo::try_lock(&self.pool, key.application_id, &key.session_id).await?;
        match locked {
            Some(locked) => Ok(Some(LockGrant {
                now: locked.now,
                previous_flags: SessionFlags::try_from(locked.prior_flags)?,
                record: SessionRecord::try_from(locked.row)?,
            })),
            None => Ok(None),
        }
    }

    async fn read(&self, key: &SessionKey) -> StoreResult<Option<StoredSession>> {
        let snapshot =
            SessionStateRepo::find(&self.pool, key.application_id, &key.session_id).await?;
        match snapshot {
            Some(snapshot) => Ok(Some(StoredSession {
                now: snapshot.now,
                record: SessionRecord::try_from(snapshot.row)?,
            })),
            None => Ok(None),
        }
    }

    async fn release(
        &self,
        key: &SessionKey,
        lock_id: LockId,
        timeout: i32,
        payload: Option<&[u8]>,
    ) -> StoreResult<u64> {
        let affected = match payload {
            Some(bytes) => {
                SessionStateRepo::release_with_items(
                    &self.pool,
                    key.application_id,
                    &key.session_id,
                    lock_id,
                    timeout,
                    bytes,
                )
                .await?
            }
            None => {
                SessionStateRepo::release(
                    &self.pool,
                    key.application_id,
                    &key.session_id,
                    lock_id,
                    timeout,
                )
                .await?
            }
        };
        Ok(affected)
    }

    async fn touch(&self, key: &SessionKey, timeout: i32) -> StoreResult<u64> {
        Ok(
            SessionStateRepo::touch(&self.pool, key.application_id, &key.session_id, timeout)
                .await?,
        )
    }

    async fn upsert(&self, session: &NewSession) -> StoreResult<()> {
        let input = UpsertSessionState {
            application_id: session.key.application_id,
            session_id: session.key.session_id.clone(),
            timeout: session.timeout,
            session_items: session.payload.clone(),
            flags: session.flags.as_i16(),
        };
        SessionStateRepo::upsert(&self.pool, &input).await?;
        Ok(())
    }

    async fn delete(&self, key: &SessionKey, lock_id: LockId) -> StoreResult<u64> {
        Ok(SessionStateRepo::delete_with_lock(
            &self.pool,
            key.application_id,
            &key.session_id,
            lock_id,
        )
        .await?)
    }

    async fn scan_expired(&self, application_id: DbId) -> StoreResult<Vec<ExpiredSession>> {
        let rows = SessionStateRepo::list_expired(&self.pool, application_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| ExpiredSession {
                session_id: row.session_id,
                timeout: row.timeout,
                payload: row.session_items,
            })
            .collect())
    }

    async fn delete_expired(&self, key: &SessionKey) -> StoreResult<u64> {
        Ok(
            SessionStateRepo::delete_if_expired(&self.pool, key.application_id, &key.session_id)
                .await?,
        )
    }

    async fn purge_expired(&self, application_id: DbId) -> StoreResult<u64> {
        Ok(SessionStateRepo::delete_expired(&self.pool, application_id).await?)
    }

    async fn ensure_application(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<DbId> {
        Ok(ApplicationRepo::ensure(&self.pool, name, description).await?.id)
    }

    async fn ensure_cleanup(
        &self,
        application_id: DbId,
        interval_minutes: i32,
    ) -> StoreResult<()> {
        let created = SessionCleanupRepo::ensure(&self.pool, application_id, interval_minutes).await?;
        if created > 0 {
            tracing::debug!(application_id, interval_minutes, "Created cleanup throttle row");
        }
        Ok(())
    }

    async fn cleanup_interval(&self, application_id: DbId) -> StoreResult<Option<i32>> {
        let row = SessionCleanupRepo::find(&self.pool, application_id).await?;
        Ok(row.map(|r| r.interval_minutes))
    }

    async fn try_claim_cleanup(&self, application_id: DbId) -> StoreResult<u64> {
        Ok(SessionCleanupRepo::try_claim(&self.pool, application_id).await?)
    }
}
