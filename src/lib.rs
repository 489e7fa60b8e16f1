//! Durable backing store for web-session state.
//!
//! Sessions are opaque, ordered bags of named values. The store persists them
//! outside process memory, hands out a per-session exclusive lock whose token
//! lives in the record itself, and expires stale sessions lazily when they
//! are looked up.
//!
//! | Layer | Item |
//! |-------|------|
//! | Payload codec | [`codec::SessionItems`], [`codec::encode`], [`codec::decode`] |
//! | Record store | [`SessionRecordRepository`] and its backends |
//! | Locking protocol | [`SessionStateStore`] |
//! | Expiration policy | [`session::expiration`] |

pub mod codec;
pub mod config;
pub mod repository;
pub mod session;

#[cfg(feature = "sqlx_postgres")]
pub mod postgres;
#[cfg(feature = "sqlx_sqlite")]
pub mod sqlite;

use std::fmt;

pub use codec::{SessionItems, SessionValue};
pub use config::StoreConfig;
pub use repository::{LockToken, SessionFlags, SessionRecord, SessionRecordRepository};
pub use session::{
    FetchResult, InMemorySessionRecordRepository, SessionData, SessionStateStore, WriteData,
};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backing table or connection failed.
    DatabaseError(String),
    /// A stored payload could not be decoded, or items could not be encoded.
    MalformedPayload(String),
    /// A session timeout was zero, negative, or too large to add to the clock.
    InvalidTimeout(i64),
    InvalidConfig(&'static str),
}

impl std::error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            StoreError::MalformedPayload(msg) => write!(f, "Malformed session payload: {msg}"),
            StoreError::InvalidTimeout(minutes) => {
                write!(f, "Invalid session timeout: {minutes} minutes")
            }
            StoreError::InvalidConfig(msg) => write!(f, "Invalid store configuration: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            StoreError::DatabaseError("connection reset".to_owned()).to_string(),
            "Database error: connection reset"
        );
        assert_eq!(
            StoreError::InvalidTimeout(-5).to_string(),
            "Invalid session timeout: -5 minutes"
        );
    }
}
