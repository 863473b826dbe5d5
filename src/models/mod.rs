//! Core data models for the file-sharing service.
//!
//! Records map to catalog rows via `sqlx::FromRow` and serialize as JSON
//! via `serde` for upload responses.

pub mod stored_object;
