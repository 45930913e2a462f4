//! Session state storage with per-session exclusive locks.
//!
//! The [`SessionStateStore`] is the entry point for a hosting environment.
//! It sits on a [`LockManager`], which drives the lock protocol through a
//! [`RecordStore`] backend, and owns an [`ExpirationReaper`] that deletes
//! expired sessions at most once per [`CleanupThrottle`] interval across
//! all processes.

pub mod accessor;
pub mod callback;
pub mod config;
pub mod error;
pub mod lock;
pub mod memory;
pub mod postgres;
pub mod reaper;
pub mod record_store;
pub mod throttle;

pub use accessor::{SessionFetch, SessionStateStore};
pub use callback::{CallbackSlot, ExpireCallback};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use lock::LockManager;
pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;
pub use reaper::{ExpirationReaper, SweepOutcome, SweepStats};
pub use record_store::{ExpiredSession, LockGrant, NewSession, RecordStore, StoredSession};
pub use throttle::CleanupThrottle;
