//! # Gridstore - Generic record-to-row persistence for grid services
//!
//! Maps plain data records onto relational rows without a hand-written
//! query layer per record type.
//!
//! Gridstore provides:
//! - Field descriptor tables driving dynamically assembled, parameterized
//!   statements (REPLACE upserts, predicated reads, deletes, counts)
//! - An open attribute bag preserving result columns no descriptor maps
//! - An authentication store for credentials and renewable login tokens
//! - A friends store for directed edges with computed reciprocity
//! - Revisioned, idempotent schema migration per store

pub mod record;
pub mod db;
pub mod schema;
pub mod table;
pub mod auth;
pub mod friends;
pub mod config;

// Re-exports for convenient access
pub use auth::{AuthStore, Credential};
pub use db::Database;
pub use friends::{FriendInfo, FriendLink, FriendsStore};
pub use record::{FieldKind, FieldSpec, FieldValue, Record};
pub use schema::{Migrations, Migrator};
pub use table::TableHandler;

/// Result type alias for gridstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for gridstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A mapped field held no value at store time; the write was aborted
    /// before any statement was issued
    #[error("Field `{field}` of a `{realm}` record is unexpectedly null")]
    NullField { realm: String, field: &'static str },

    #[error("Column `{column}` cannot be read as {expected} (got `{value}`)")]
    Coerce {
        column: String,
        expected: &'static str,
        value: String,
    },

    #[error("No schema is registered for store `{0}`")]
    UnknownStore(String),
}
