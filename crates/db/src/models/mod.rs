//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` struct matching the table row and,
//! where inserts need one, an input DTO.

pub mod application;
pub mod session_cleanup;
pub mod session_state;
