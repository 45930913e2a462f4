//! Application model.

use sessionstate_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `session_applications` table.
#[derive(Debug, Clone, FromRow)]
pub struct Application {
    pub id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
}
