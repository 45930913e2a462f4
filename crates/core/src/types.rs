/// Application ids are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Optimistic-concurrency token stored on every session row.
pub type LockId = i64;
