//! Cleanup throttle model.

use sessionstate_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `session_cleanup` table.
#[derive(Debug, Clone, FromRow)]
pub struct SessionCleanup {
    pub application_id: DbId,
    pub last_run: Timestamp,
    pub interval_minutes: i32,
}
