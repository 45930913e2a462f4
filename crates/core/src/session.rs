//! Session record model and lock acquisition outcomes.
//!
//! A session row is keyed by `(application_id, session_id)`. Its `lock_id`
//! is an optimistic-concurrency token that only ever grows, by exactly one
//! per successful exclusive acquisition. `expires` is the sole liveness
//! signal: a row with `expires <= now` is expired whether or not it is
//! locked.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, LockId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of an externally generated session id.
pub const MAX_SESSION_ID_LEN: usize = 255;

/// Lock token given to a freshly created or overwritten row.
pub const INITIAL_LOCK_ID: LockId = 0;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Primary key of a session row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub application_id: DbId,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(application_id: DbId, session_id: impl Into<String>) -> Self {
        Self {
            application_id,
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application_id, self.session_id)
    }
}

/// Validate an externally supplied session id.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_SESSION_ID_LEN` characters, matching the
///   column's `char_length` check.
pub fn validate_session_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(
            "Session id must not be empty".to_string(),
        ));
    }
    if id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Session id must not exceed {MAX_SESSION_ID_LEN} characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Row flags, also reported to the host as the fetch "action flags".
///
/// `Uninitialized` marks a placeholder created by `create_uninitialized`
/// whose payload has never been written; the host must start from an
/// empty item collection rather than decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionFlags {
    #[default]
    None,
    Uninitialized,
}

impl SessionFlags {
    pub fn as_i16(self) -> i16 {
        match self {
            SessionFlags::None => 0,
            SessionFlags::Uninitialized => 1,
        }
    }
}

impl TryFrom<i16> for SessionFlags {
    type Error = CoreError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SessionFlags::None),
            1 => Ok(SessionFlags::Uninitialized),
            other => Err(CoreError::Validation(format!(
                "Unknown session flags value: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One session row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub application_id: DbId,
    pub created: Timestamp,
    pub expires: Timestamp,
    pub lock_date: Timestamp,
    pub lock_id: LockId,
    /// Idle timeout in minutes.
    pub timeout: i32,
    pub locked: bool,
    /// Opaque serialized items; `None` for uninitialized placeholders.
    pub payload: Option<Vec<u8>>,
    pub flags: SessionFlags,
}

impl SessionRecord {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.application_id, self.session_id.clone())
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        is_expired(self.expires, now)
    }

    pub fn lock_age_at(&self, now: Timestamp) -> Duration {
        lock_age(self.lock_date, now)
    }
}

/// `now + timeout minutes`. The only way an expiry is ever computed.
pub fn expires_at(now: Timestamp, timeout_minutes: i32) -> Timestamp {
    now + Duration::minutes(i64::from(timeout_minutes))
}

pub fn is_expired(expires: Timestamp, now: Timestamp) -> bool {
    expires <= now
}

/// Time since the lock was taken, clamped at zero.
pub fn lock_age(lock_date: Timestamp, now: Timestamp) -> Duration {
    (now - lock_date).max(Duration::zero())
}

// ---------------------------------------------------------------------------
// Acquisition outcomes
// ---------------------------------------------------------------------------

/// Why a record could not be handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Another requester holds the exclusive lock.
    HeldByOther { lock_age: Duration, lock_id: LockId },
    /// The row exists but `expires <= now`.
    Expired,
    /// No row with this key.
    Absent,
}

/// Result of an exclusive acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// The lock is now held by the caller under `lock_id`.
    Granted {
        record: SessionRecord,
        lock_id: LockId,
        lock_age: Duration,
        /// Flags as they were before acquisition cleared them.
        actions: SessionFlags,
    },
    Unavailable(UnavailableReason),
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted { .. })
    }

    /// Boolean view for hosts that only understand "locked": any outcome
    /// other than a granted lock reads as unavailable.
    pub fn locked(&self) -> bool {
        !self.is_granted()
    }
}

/// Result of a shared (read-only) fetch. No lock state is changed.
#[derive(Debug, Clone, PartialEq)]
pub enum SharedOutcome {
    Readable {
        record: SessionRecord,
        lock_age: Duration,
    },
    Unavailable(UnavailableReason),
}

/// Classify a row observed after a failed conditional lock.
pub fn classify_unavailable(record: Option<&SessionRecord>, now: Timestamp) -> UnavailableReason {
    match record {
        None => UnavailableReason::Absent,
        Some(r) if r.is_expired_at(now) => UnavailableReason::Expired,
        Some(r) => UnavailableReason::HeldByOther {
            lock_age: r.lock_age_at(now),
            lock_id: r.lock_id,
        },
    }
}
