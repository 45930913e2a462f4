//! Domain types for the session-state store.
//!
//! Everything here is pure: no database access, no async. The record
//! model, the lock acquisition outcomes, expiry arithmetic, the cleanup
//! throttle rules, and the session payload serializer all live in this
//! crate so that every record-store backend agrees on them.

pub mod cleanup;
pub mod clock;
pub mod error;
pub mod items;
pub mod session;
pub mod types;
