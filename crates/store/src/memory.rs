//! In-process record store.
//!
//! Rows live in a mutex-guarded map and every method holds the mutex for
//! its whole statement, which gives the same single-row atomicity the
//! database provides. Useful for single-process hosts and for tests, which
//! drive expiry with a [`ManualClock`](sessionstate_core::clock::ManualClock).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sessionstate_core::cleanup::is_sweep_due;
use sessionstate_core::clock::{Clock, SystemClock};
use sessionstate_core::session::{
    expires_at, SessionFlags, SessionKey, SessionRecord, INITIAL_LOCK_ID,
};
use sessionstate_core::types::{DbId, LockId, Timestamp};

use crate::error::StoreResult;
use crate::record_store::{ExpiredSession, LockGrant, NewSession, RecordStore, StoredSession};

#[derive(Debug, Clone, Copy)]
struct CleanupRow {
    last_run: Timestamp,
    interval_minutes: i32,
}

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<SessionKey, SessionRecord>,
    cleanup: HashMap<DbId, CleanupRow>,
    applications: HashMap<String, DbId>,
}

/// [`RecordStore`] backed by process memory.
pub struct MemoryRecordStore {
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic mid-statement leaves no partial row behind: every
        // mutation below is a single assignment or removal.
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn try_lock(&self, key: &SessionKey) -> StoreResult<Option<LockGrant>> {
        let now = self.clock.now();
        let mut tables = self.tables();
        match tables.sessions.get_mut(key) {
            Some(row) if !row.locked && !row.is_expired_at(now) => {
                let previous_flags = row.flags;
                row.locked = true;
                row.lock_date = now;
                row.lock_id += 1;
                row.flags = SessionFlags::None;
                Ok(Some(LockGrant {
                    record: row.clone(),
                    previous_flags,
                    now,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn read(&self, key: &SessionKey) -> StoreResult<Option<StoredSession>> {
        let now = self.clock.now();
        let tables = self.tables();
        Ok(tables.sessions.get(key).map(|record| StoredSession {
            record: record.clone(),
            now,
        }))
    }

    async fn release(
        &self,
        key: &SessionKey,
        lock_id: LockId,
        timeout: i32,
        payload: Option<&[u8]>,
    ) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables();
        match tables.sessions.get_mut(key) {
            Some(row) if row.lock_id == lock_id => {
                row.locked = false;
                row.expires = expires_at(now, timeout);
                if let Some(bytes) = payload {
                    row.payload = Some(bytes.to_vec());
                    row.timeout = timeout;
                }
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn touch(&self, key: &SessionKey, timeout: i32) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables();
        match tables.sessions.get_mut(key) {
            Some(row) => {
                row.expires = expires_at(now, timeout);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn upsert(&self, session: &NewSession) -> StoreResult<()> {
        let now = self.clock.now();
        let record = SessionRecord {
            session_id: session.key.session_id.clone(),
            application_id: session.key.application_id,
            created: now,
            expires: expires_at(now, session.timeout),
            lock_date: now,
            lock_id: INITIAL_LOCK_ID,
            timeout: session.timeout,
            locked: false,
            payload: session.payload.clone(),
            flags: session.flags,
        };
        self.tables().sessions.insert(session.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &SessionKey, lock_id: LockId) -> StoreResult<u64> {
        let mut tables = self.tables();
        match tables.sessions.get(key) {
            Some(row) if row.lock_id == lock_id => {
                tables.sessions.remove(key);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn scan_expired(&self, application_id: DbId) -> StoreResult<Vec<ExpiredSession>> {
        let now = self.clock.now();
        let tables = self.tables();
        let mut expired: Vec<&SessionRecord> = tables
            .sessions
            .values()
            .filter(|r| r.application_id == application_id && r.is_expired_at(now))
            .collect();
        expired.sort_by_key(|r| r.expires);
        Ok(expired
            .into_iter()
            .map(|r| ExpiredSession {
                session_id: r.session_id.clone(),
                timeout: r.timeout,
                payload: r.payload.clone(),
            })
            .collect())
    }

    async fn delete_expired(&self, key: &SessionKey) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables();
        match tables.sessions.get(key) {
            Some(row) if row.is_expired_at(now) => {
                tables.sessions.remove(key);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn purge_expired(&self, application_id: DbId) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables();
        let before = tables.sessions.len();
        tables
            .sessions
            .retain(|_, r| r.application_id != application_id || !r.is_expired_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn ensure_application(
        &self,
        name: &str,
        _description: Option<&str>,
    ) -> StoreResult<DbId> {
        let mut tables = self.tables();
        let next_id = tables.applications.len() as DbId + 1;
        Ok(*tables
            .applications
            .entry(name.to_string())
            .or_insert(next_id))
    }

    async fn ensure_cleanup(
        &self,
        application_id: DbId,
        interval_minutes: i32,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        self.tables()
            .cleanup
            .entry(application_id)
            .or_insert(CleanupRow {
                last_run: now,
                interval_minutes,
            });
        Ok(())
    }

    async fn cleanup_interval(&self, application_id: DbId) -> StoreResult<Option<i32>> {
        Ok(self
            .tables()
            .cleanup
            .get(&application_id)
            .map(|row| row.interval_minutes))
    }

    async fn try_claim_cleanup(&self, application_id: DbId) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut tables = self.tables();
        match tables.cleanup.get_mut(&application_id) {
            Some(row) if is_sweep_due(row.last_run, row.interval_minutes, now) => {
                row.last_run = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}
