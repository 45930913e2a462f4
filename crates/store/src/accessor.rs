//! Host-facing session state operations.
//!
//! [`SessionStateStore`] is what a request-handling layer calls: it turns
//! session ids into keys under the configured application, runs payloads
//! through the serializer, and reports lock outcomes in the shape the host
//! expects. It never retries; a host that sees `locked` decides its own
//! backoff.

use std::sync::Arc;

use chrono::Duration;
use sessionstate_core::cleanup::sweep_period;
use sessionstate_core::items::{JsonSessionSerializer, SessionData, SessionSerializer};
use sessionstate_core::session::{
    validate_session_id, AcquireOutcome, SessionFlags, SessionKey, SessionRecord, SharedOutcome,
    UnavailableReason, INITIAL_LOCK_ID,
};
use sessionstate_core::types::{DbId, LockId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::callback::{CallbackSlot, ExpireCallback};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::lock::LockManager;
use crate::reaper::ExpirationReaper;
use crate::record_store::RecordStore;
use crate::throttle::CleanupThrottle;

/// Result of a fetch, flattened for the host.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFetch {
    /// Present only when the caller may use the session.
    pub data: Option<SessionData>,
    /// `true` when another requester holds the lock.
    pub locked: bool,
    pub lock_age: Duration,
    pub lock_id: LockId,
    pub actions: SessionFlags,
}

impl SessionFetch {
    fn unavailable(reason: UnavailableReason) -> Self {
        match reason {
            UnavailableReason::HeldByOther { lock_age, lock_id } => Self {
                data: None,
                locked: true,
                lock_age,
                lock_id,
                actions: SessionFlags::None,
            },
            UnavailableReason::Expired | UnavailableReason::Absent => Self {
                data: None,
                locked: false,
                lock_age: Duration::zero(),
                lock_id: INITIAL_LOCK_ID,
                actions: SessionFlags::None,
            },
        }
    }
}

/// Session state for one application.
pub struct SessionStateStore {
    config: StoreConfig,
    application_id: DbId,
    locks: LockManager,
    serializer: Arc<dyn SessionSerializer>,
    callback: CallbackSlot,
    reaper: Arc<ExpirationReaper>,
}

impl SessionStateStore {
    /// Open the store with the JSON serializer.
    pub async fn open(store: Arc<dyn RecordStore>, config: StoreConfig) -> StoreResult<Self> {
        Self::open_with(store, config, Arc::new(JsonSessionSerializer)).await
    }

    /// Resolve the application, make sure its throttle row exists and build
    /// the reaper from the interval stored there.
    pub async fn open_with(
        store: Arc<dyn RecordStore>,
        config: StoreConfig,
        serializer: Arc<dyn SessionSerializer>,
    ) -> StoreResult<Self> {
        config.validate()?;

        let application_id = store
            .ensure_application(&config.application_name, None)
            .await?;

        let throttle = CleanupThrottle::new(store.clone(), application_id);
        throttle.ensure(config.cleanup_interval_minutes).await?;
        let interval_minutes = throttle.interval_minutes().await?;

        let locks = LockManager::new(store);
        let callback = CallbackSlot::new();
        let reaper = Arc::new(ExpirationReaper::new(
            locks.clone(),
            throttle,
            serializer.clone(),
            callback.clone(),
            sweep_period(interval_minutes),
        ));

        tracing::info!(
            application = %config.application_name,
            application_id,
            interval_minutes,
            "Session store opened"
        );

        Ok(Self {
            config,
            application_id,
            locks,
            serializer,
            callback,
            reaper,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn application_id(&self) -> DbId {
        self.application_id
    }

    /// Fresh, unsaved data for a new session.
    pub fn create_new_store_data(&self, timeout: i32) -> SessionData {
        SessionData::new(timeout)
    }

    /// Insert a placeholder row with no payload, overwriting any existing one.
    pub async fn create_uninitialized(&self, id: &str, timeout: i32) -> StoreResult<()> {
        let key = self.key(id)?;
        self.locks
            .create(&key, timeout, None, SessionFlags::Uninitialized)
            .await
    }

    /// Take the exclusive lock and return the data.
    ///
    /// If the payload cannot be decoded the lock is released again before
    /// the error is returned.
    pub async fn fetch_exclusive(&self, id: &str) -> StoreResult<SessionFetch> {
        let key = self.key(id)?;
        match self.locks.acquire_exclusive(&key).await? {
            AcquireOutcome::Granted {
                record,
                lock_id,
                lock_age,
                actions,
            } => {
                let data = match self.decode(&record, actions) {
                    Ok(data) => data,
                    Err(e) => {
                        if let Err(release_err) =
                            self.locks.release(&key, lock_id, record.timeout).await
                        {
                            tracing::warn!(%key, error = %release_err, "Failed to release undecodable session");
                        }
                        return Err(e);
                    }
                };
                Ok(SessionFetch {
                    data: Some(data),
                    locked: false,
                    lock_age,
                    lock_id,
                    actions,
                })
            }
            AcquireOutcome::Unavailable(reason) => Ok(SessionFetch::unavailable(reason)),
        }
    }

    /// Read the data without locking. A row locked by someone else is
    /// reported as locked with no data.
    pub async fn fetch_shared(&self, id: &str) -> StoreResult<SessionFetch> {
        let key = self.key(id)?;
        match self.locks.acquire_shared(&key).await? {
            SharedOutcome::Readable { record, lock_age } if record.locked => {
                Ok(SessionFetch::unavailable(UnavailableReason::HeldByOther {
                    lock_age,
                    lock_id: record.lock_id,
                }))
            }
            SharedOutcome::Readable { record, lock_age } => {
                let data = self.decode(&record, record.flags)?;
                Ok(SessionFetch {
                    data: Some(data),
                    locked: false,
                    lock_age,
                    lock_id: record.lock_id,
                    actions: record.flags,
                })
            }
            SharedOutcome::Unavailable(reason) => Ok(SessionFetch::unavailable(reason)),
        }
    }

    /// Save `data` and release the lock held under `lock_id`.
    ///
    /// Returns `false` when the lock had already been lost.
    pub async fn release_and_save(
        &self,
        id: &str,
        data: &SessionData,
        lock_id: LockId,
        is_new: bool,
    ) -> StoreResult<bool> {
        let key = self.key(id)?;
        let payload = self.serializer.encode(&data.items)?;
        self.locks
            .set_and_release(&key, lock_id, payload, data.timeout, is_new)
            .await
    }

    /// Release without saving, extending by the configured timeout.
    pub async fn release_only(&self, id: &str, lock_id: LockId) -> StoreResult<bool> {
        let key = self.key(id)?;
        self.locks
            .release(&key, lock_id, self.config.session_timeout_minutes)
            .await
    }

    /// Extend the session's life by the configured timeout. Any caller may
    /// do this; no lock token is checked.
    pub async fn touch(&self, id: &str) -> StoreResult<bool> {
        let key = self.key(id)?;
        self.locks
            .touch(&key, self.config.session_timeout_minutes)
            .await
    }

    /// Delete the session held under `lock_id`.
    ///
    /// When a row was removed and a callback is registered, the callback
    /// runs with `data` before this returns. Its error is surfaced as
    /// [`StoreError::Callback`]; the row stays deleted.
    pub async fn remove(&self, id: &str, lock_id: LockId, data: &SessionData) -> StoreResult<bool> {
        let key = self.key(id)?;
        let deleted = self.locks.delete(&key, lock_id).await?;
        if deleted {
            if let Some(callback) = self.callback.get() {
                callback(id, data).map_err(StoreError::Callback)?;
            }
        }
        Ok(deleted)
    }

    /// Register the callback fired for removed and reaped sessions.
    ///
    /// Returns `false`, without storing it, when expire callbacks are
    /// disabled in the configuration.
    pub fn set_expire_callback(&self, callback: ExpireCallback) -> bool {
        if !self.config.enable_expire_callback {
            tracing::debug!("Expire callbacks disabled, ignoring registration");
            return false;
        }
        self.callback.set(callback);
        true
    }

    pub fn reaper(&self) -> Arc<ExpirationReaper> {
        self.reaper.clone()
    }

    /// Run the reaper on its own task until `cancel` fires.
    pub fn spawn_reaper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let reaper = self.reaper.clone();
        tokio::spawn(async move { reaper.run(cancel).await })
    }

    fn key(&self, id: &str) -> StoreResult<SessionKey> {
        validate_session_id(id)?;
        Ok(SessionKey::new(self.application_id, id))
    }

    fn decode(&self, record: &SessionRecord, actions: SessionFlags) -> StoreResult<SessionData> {
        if actions == SessionFlags::Uninitialized {
            return Ok(SessionData::new(record.timeout));
        }
        let items = self.serializer.decode(record.payload.as_deref())?;
        Ok(SessionData::with_items(items, record.timeout))
    }
}
