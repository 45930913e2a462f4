use sessionstate_core::error::CoreError;
use sessionstate_core::items::PayloadError;

/// Error type for every session-store operation.
///
/// Record-store failures pass through undecorated; the store never retries
/// and never turns a failure into a silent no-op.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database could not be reached or rejected a statement.
    #[error("Record store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A registered expire callback returned an error.
    #[error("Expire callback failed: {0}")]
    Callback(anyhow::Error),
}

/// Convenience alias for store return values.
pub type StoreResult<T> = Result<T, StoreError>;
