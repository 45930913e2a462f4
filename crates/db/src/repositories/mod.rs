//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod application_repo;
pub mod session_cleanup_repo;
pub mod session_state_repo;

pub use application_repo::ApplicationRepo;
pub use session_cleanup_repo::SessionCleanupRepo;
pub use session_state_repo::SessionStateRepo;
