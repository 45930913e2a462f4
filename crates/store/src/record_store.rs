//! The record-store contract consumed by the lock protocol.
//!
//! Each method is one atomic statement against one row (or, for the sweep
//! helpers, one application's rows). Timestamps are always taken from the
//! store's own clock; callers pass durations, never absolute times.

use async_trait::async_trait;
use sessionstate_core::session::{SessionFlags, SessionKey, SessionRecord};
use sessionstate_core::types::{DbId, LockId, Timestamp};

use crate::error::StoreResult;

/// A row as read, together with the store's current time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub record: SessionRecord,
    pub now: Timestamp,
}

/// A lock just taken by [`RecordStore::try_lock`].
#[derive(Debug, Clone, PartialEq)]
pub struct LockGrant {
    /// The row after the update: locked, token bumped, flags cleared.
    pub record: SessionRecord,
    /// Flags the row carried before the update.
    pub previous_flags: SessionFlags,
    pub now: Timestamp,
}

/// Input for an insert-or-overwrite.
///
/// The written row is always unlocked with `lock_id = 0`.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub key: SessionKey,
    pub timeout: i32,
    pub payload: Option<Vec<u8>>,
    pub flags: SessionFlags,
}

/// A row found by the expiry scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredSession {
    pub session_id: String,
    pub timeout: i32,
    pub payload: Option<Vec<u8>>,
}

/// Durable keyed table of session rows plus the per-application throttle rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // -- session rows -------------------------------------------------------

    /// Where `locked = false AND expires > now`, set `locked = true,
    /// lock_date = now, lock_id = lock_id + 1` and clear the flags, all in
    /// one atomic step. `None` when no row qualified.
    async fn try_lock(&self, key: &SessionKey) -> StoreResult<Option<LockGrant>>;

    async fn read(&self, key: &SessionKey) -> StoreResult<Option<StoredSession>>;

    /// Set `locked = false, expires = now + timeout` where `lock_id` matches,
    /// also replacing the payload and timeout when `payload` is given.
    async fn release(
        &self,
        key: &SessionKey,
        lock_id: LockId,
        timeout: i32,
        payload: Option<&[u8]>,
    ) -> StoreResult<u64>;

    /// Set `expires = now + timeout` with no token check.
    async fn touch(&self, key: &SessionKey, timeout: i32) -> StoreResult<u64>;

    async fn upsert(&self, session: &NewSession) -> StoreResult<()>;

    /// Delete the row where `lock_id` matches.
    async fn delete(&self, key: &SessionKey, lock_id: LockId) -> StoreResult<u64>;

    // -- expiry sweep -------------------------------------------------------

    /// Every row of the application with `expires <= now`.
    async fn scan_expired(&self, application_id: DbId) -> StoreResult<Vec<ExpiredSession>>;

    /// Delete one row only if it is still expired.
    async fn delete_expired(&self, key: &SessionKey) -> StoreResult<u64>;

    /// Delete every expired row of the application.
    async fn purge_expired(&self, application_id: DbId) -> StoreResult<u64>;

    // -- applications and throttle -----------------------------------------

    /// Resolve an application name to its id, registering it on first use.
    async fn ensure_application(&self, name: &str, description: Option<&str>)
        -> StoreResult<DbId>;

    /// Create the throttle row with `last_run = now` unless it exists.
    async fn ensure_cleanup(&self, application_id: DbId, interval_minutes: i32)
        -> StoreResult<()>;

    /// Stored interval of the throttle row, if the row exists.
    async fn cleanup_interval(&self, application_id: DbId) -> StoreResult<Option<i32>>;

    /// Set `last_run = now` where `last_run + interval < now`.
    async fn try_claim_cleanup(&self, application_id: DbId) -> StoreResult<u64>;
}
