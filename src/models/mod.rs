//! Core data models for the chunked asset store.
//!
//! These entities map to SQLite rows via `sqlx::FromRow` and serialize
//! as JSON via `serde` for the HTTP layer.

pub mod bucket;
pub mod catalog;
pub mod file;
