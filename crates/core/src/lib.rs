//! Shared domain types for the aicenter backend.
//!
//! Holds the error type used across crate boundaries and the input
//! validation rules applied before any work is handed to an external
//! service.

pub mod error;
pub mod prompt;
