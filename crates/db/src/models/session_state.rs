//! Session state rows and DTOs.

use sessionstate_core::error::CoreError;
use sessionstate_core::session::{SessionFlags, SessionRecord};
use sessionstate_core::types::{DbId, LockId, Timestamp};
use sqlx::FromRow;

/// A row from the `session_states` table.
#[derive(Debug, Clone, FromRow)]
pub struct SessionStateRow {
    pub application_id: DbId,
    pub session_id: String,
    pub created: Timestamp,
    pub expires: Timestamp,
    pub lock_date: Timestamp,
    pub lock_id: LockId,
    pub timeout: i32,
    pub locked: bool,
    pub session_items: Option<Vec<u8>>,
    pub flags: i16,
}

impl TryFrom<SessionStateRow> for SessionRecord {
    type Error = CoreError;

    fn try_from(row: SessionStateRow) -> Result<Self, Self::Error> {
        Ok(SessionRecord {
            session_id: row.session_id,
            application_id: row.application_id,
            created: row.created,
            expires: row.expires,
            lock_date: row.lock_date,
            lock_id: row.lock_id,
            timeout: row.timeout,
            locked: row.locked,
            payload: row.session_items,
            flags: SessionFlags::try_from(row.flags)?,
        })
    }
}

/// A session row read together with the server's `NOW()`.
///
/// Expiry and lock age must be judged against the database clock, never
/// the caller's.
#[derive(Debug, Clone, FromRow)]
pub struct SessionStateSnapshot {
    pub now: Timestamp,
    #[sqlx(flatten)]
    pub row: SessionStateRow,
}

/// A row just locked by `try_lock`, with the flags it carried before.
#[derive(Debug, Clone, FromRow)]
pub struct LockedSessionRow {
    pub now: Timestamp,
    pub prior_flags: i16,
    #[sqlx(flatten)]
    pub row: SessionStateRow,
}

/// Id and payload of a session found expired by the sweep.
#[derive(Debug, Clone, FromRow)]
pub struct ExpiredSessionRow {
    pub session_id: String,
    pub timeout: i32,
    pub session_items: Option<Vec<u8>>,
}

/// DTO for inserting or fully overwriting a session row.
///
/// The row always lands unlocked with `lock_id = 0`; timestamps come from
/// the server.
#[derive(Debug, Clone)]
pub struct UpsertSessionState {
    pub application_id: DbId,
    pub session_id: String,
    pub timeout: i32,
    pub session_items: Option<Vec<u8>>,
    pub flags: i16,
}
