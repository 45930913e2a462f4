//! Exclusive-lock protocol over a [`RecordStore`].
//!
//! Mutual exclusion comes entirely from the store's conditional updates.
//! Nothing here holds an in-memory lock, because the competing holders are
//! separate requests that may be served by separate processes.

use std::sync::Arc;

use sessionstate_core::session::{
    classify_unavailable, AcquireOutcome, SessionFlags, SessionKey, SharedOutcome,
    UnavailableReason,
};
use sessionstate_core::types::{DbId, LockId};

use crate::error::StoreResult;
use crate::record_store::{ExpiredSession, NewSession, RecordStore};

/// Acquires, releases and deletes session rows under their lock token.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn RecordStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Try once to take the exclusive lock. Never waits or retries.
    ///
    /// On success the row's token has been incremented by one and its flags
    /// cleared in the same statement that locked it; the returned `actions`
    /// are the flags from before that.
    pub async fn acquire_exclusive(&self, key: &SessionKey) -> StoreResult<AcquireOutcome> {
        let Some(grant) = self.store.try_lock(key).await? else {
            let reason = self.unavailable_reason(key).await?;
            tracing::debug!(%key, ?reason, "Session lock unavailable");
            return Ok(AcquireOutcome::Unavailable(reason));
        };

        let lock_id = grant.record.lock_id;
        let lock_age = grant.record.lock_age_at(grant.now);
        tracing::debug!(%key, lock_id, "Session lock granted");
        Ok(AcquireOutcome::Granted {
            record: grant.record,
            lock_id,
            lock_age,
            actions: grant.previous_flags,
        })
    }

    /// Read the row without touching lock state. The result may be stale by
    /// the time the caller sees it.
    pub async fn acquire_shared(&self, key: &SessionKey) -> StoreResult<SharedOutcome> {
        let Some(stored) = self.store.read(key).await? else {
            return Ok(SharedOutcome::Unavailable(UnavailableReason::Absent));
        };
        if stored.record.is_expired_at(stored.now) {
            return Ok(SharedOutcome::Unavailable(UnavailableReason::Expired));
        }
        let lock_age = stored.record.lock_age_at(stored.now);
        Ok(SharedOutcome::Readable {
            record: stored.record,
            lock_age,
        })
    }

    /// Unlock and extend the row. Returns `false` on a token mismatch, which
    /// callers treat as already handled.
    pub async fn release(
        &self,
        key: &SessionKey,
        lock_id: LockId,
        timeout: i32,
    ) -> StoreResult<bool> {
        let applied = self.store.release(key, lock_id, timeout, None).await? > 0;
        if !applied {
            tracing::debug!(%key, lock_id, "Release ignored, lock token no longer current");
        }
        Ok(applied)
    }

    /// Store `payload` and unlock.
    ///
    /// A new row is upserted without any token check; an existing one is
    /// written only if `lock_id` still matches.
    pub async fn set_and_release(
        &self,
        key: &SessionKey,
        lock_id: LockId,
        payload: Vec<u8>,
        timeout: i32,
        is_new: bool,
    ) -> StoreResult<bool> {
        if is_new {
            self.store
                .upsert(&NewSession {
                    key: key.clone(),
                    timeout,
                    payload: Some(payload),
                    flags: SessionFlags::None,
                })
                .await?;
            return Ok(true);
        }

        let applied = self
            .store
            .release(key, lock_id, timeout, Some(&payload))
            .await?
            > 0;
        if !applied {
            tracing::debug!(%key, lock_id, "Save ignored, lock token no longer current");
        }
        Ok(applied)
    }

    /// Insert or overwrite a row, unlocked with the initial token.
    pub async fn create(
        &self,
        key: &SessionKey,
        timeout: i32,
        payload: Option<Vec<u8>>,
        flags: SessionFlags,
    ) -> StoreResult<()> {
        self.store
            .upsert(&NewSession {
                key: key.clone(),
                timeout,
                payload,
                flags,
            })
            .await
    }

    /// Delete the row held under `lock_id`. Returns whether a row was removed.
    pub async fn delete(&self, key: &SessionKey, lock_id: LockId) -> StoreResult<bool> {
        let deleted = self.store.delete(key, lock_id).await? > 0;
        if !deleted {
            tracing::debug!(%key, lock_id, "Delete ignored, lock token no longer current");
        }
        Ok(deleted)
    }

    /// Push out the expiry with no token check.
    pub async fn touch(&self, key: &SessionKey, timeout: i32) -> StoreResult<bool> {
        Ok(self.store.touch(key, timeout).await? > 0)
    }

    pub async fn scan_expired(&self, application_id: DbId) -> StoreResult<Vec<ExpiredSession>> {
        self.store.scan_expired(application_id).await
    }

    pub async fn delete_expired(&self, key: &SessionKey) -> StoreResult<bool> {
        Ok(self.store.delete_expired(key).await? > 0)
    }

    pub async fn purge_expired(&self, application_id: DbId) -> StoreResult<u64> {
        self.store.purge_expired(application_id).await
    }

    async fn unavailable_reason(&self, key: &SessionKey) -> StoreResult<UnavailableReason> {
        let stored = self.store.read(key).await?;
        Ok(match stored {
            Some(s) => classify_unavailable(Some(&s.record), s.now),
            None => UnavailableReason::Absent,
        })
    }
}
